//! Provider data structure passed to resources

use crate::exec::Planner;

#[derive(Debug, Clone, Default)]
pub struct KclProviderData {
    pub kcl_path: Option<String>,
}

impl KclProviderData {
    pub fn new(kcl_path: Option<String>) -> Self {
        Self { kcl_path }
    }

    pub fn planner(&self) -> Planner {
        Planner::new(self.kcl_path.clone())
    }
}
