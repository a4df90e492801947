use tessera_core::TaskSubmitter;

/// Shared state handed to every intake handler.
#[derive(Clone, Debug)]
pub struct AppState {
    pub submitter: TaskSubmitter,
}

impl AppState {
    pub fn new(submitter: TaskSubmitter) -> Self {
        Self { submitter }
    }
}
