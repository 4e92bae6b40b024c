/// What to do when two leaves of one tree share a name but carry different
/// attached values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Conflicts {
    /// Fail with [`Error::ConflictingBinding`](crate::Error::ConflictingBinding).
    #[default]
    Reject,
    /// The leaf met last in a pre-order walk wins.
    LastWins,
}

/// Engine configuration, fixed when a [`Vm`](crate::Vm) is created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Prefix of the synthetic names minted for opaque values.
    pub name_prefix: String,
    /// First value of the synthetic-name counter.
    pub first_id: usize,
    pub conflicts: Conflicts,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            name_prefix: "_".to_owned(),
            first_id: 0,
            conflicts: Conflicts::Reject,
        }
    }
}

impl Config {
    pub fn name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    pub fn first_id(mut self, id: usize) -> Self {
        self.first_id = id;
        self
    }

    pub fn conflicts(mut self, conflicts: Conflicts) -> Self {
        self.conflicts = conflicts;
        self
    }
}
