use super::channel::Channel;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusKind {
    #[default]
    Started,
    Passed(Channel),
    Failed(Channel),
    Finished,
}

/// Progress message sent from a tuning run to its front end
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TuneStatus {
    /// Fraction of requested channels resolved so far
    pub progress: f32,
    pub kind: StatusKind,
}

impl TuneStatus {
    pub fn new(progress: f32, kind: StatusKind) -> Self {
        Self { progress, kind }
    }
}
