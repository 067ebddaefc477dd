//! Selects a `PackExecutor` implementation by `pack_type`. Production packs
//! register themselves here; `demo.echo` ships as the reference
//! implementation and test fixture.

use std::collections::HashMap;
use std::sync::Arc;

use dpp_executor::{MockExecutor, PackExecutor};

#[derive(Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn PackExecutor>>,
}

impl ExecutorRegistry {
    pub fn with_defaults() -> Self {
        let mut executors: HashMap<String, Arc<dyn PackExecutor>> = HashMap::new();
        executors.insert("demo.echo".to_string(), Arc::new(MockExecutor::default()));
        Self { executors }
    }

    pub fn get(&self, pack_type: &str) -> Option<Arc<dyn PackExecutor>> {
        self.executors.get(pack_type).cloned()
    }
}
