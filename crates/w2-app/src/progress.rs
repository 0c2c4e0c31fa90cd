use w2_results::RunId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Validating,
    Staging,
    Executing,
    CheckingDrift,
    Capturing,
    Completed,
}

#[derive(Debug, Clone)]
pub struct RunProgressEvent {
    pub run_id: RunId,
    pub stage: RunStage,
    pub elapsed_wall_s: f64,
    pub message: Option<String>,
}

impl RunProgressEvent {
    pub fn stage(
        run_id: impl Into<RunId>,
        stage: RunStage,
        elapsed_wall_s: f64,
        message: Option<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            stage,
            elapsed_wall_s,
            message,
        }
    }
}
