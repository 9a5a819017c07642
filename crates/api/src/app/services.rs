use jobping_pipeline::Pipeline;

/// State shared by handlers.
#[derive(Clone)]
pub struct AppServices {
    pub pipeline: Pipeline,
}

impl AppServices {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }
}
