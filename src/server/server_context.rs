use crate::pipeline::Pipeline;

pub struct ServerContext {
    pub pipeline: Pipeline,
    pub max_body_size: usize,
}

impl ServerContext {
    pub fn new(pipeline: Pipeline, max_body_size: u64) -> Self {
        Self {
            pipeline,
            max_body_size: usize::try_from(max_body_size).unwrap_or(usize::MAX),
        }
    }
}
