//! Task manager: algorithm registry and task lifecycle
//!
//! Enforces the at-most-one-active-task policy and owns every task it
//! creates. Each task gets a fresh algorithm instance from the registered
//! factory so per-task progress accounting never crosses tasks.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::algorithm::AlgorithmDescriptor;
use crate::error::{CopyError, Result};
use crate::hooks::TaskHooks;
use crate::task::{CopyTask, TaskState};

/// Registry of copy algorithms plus the set of live tasks
#[derive(Default)]
pub struct TaskManager {
    algorithms: Mutex<HashMap<String, AlgorithmDescriptor>>,
    tasks: Mutex<Vec<Arc<CopyTask>>>,
    active: Mutex<Option<Arc<CopyTask>>>,
    hooks: Mutex<Option<Arc<dyn TaskHooks>>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager pre-loaded with the built-in algorithms
    pub fn with_builtin_algorithms() -> Self {
        let manager = Self::new();
        manager.register_algorithm(crate::algorithms::DefaultAlgorithm::descriptor());
        manager.register_algorithm(crate::algorithms::SyncAlgorithm::descriptor());
        manager
    }

    /// Hooks attached to every task created after this call
    pub fn set_hooks(&self, hooks: Arc<dyn TaskHooks>) {
        *self.hooks.lock().unwrap() = Some(hooks);
    }

    /// Register (or replace) an algorithm under its descriptor name
    pub fn register_algorithm(&self, descriptor: AlgorithmDescriptor) {
        info!(name = %descriptor.name, "registering algorithm");
        self.algorithms
            .lock()
            .unwrap()
            .insert(descriptor.name.clone(), descriptor);
    }

    pub fn unregister_algorithm(&self, name: &str) -> bool {
        let removed = self.algorithms.lock().unwrap().remove(name).is_some();
        if removed {
            info!(name, "unregistered algorithm");
        }
        removed
    }

    /// Registered algorithm names, sorted for stable listings
    pub fn available_algorithms(&self) -> Vec<String> {
        let mut names: Vec<_> = self.algorithms.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn algorithm_descriptor(&self, name: &str) -> Option<AlgorithmDescriptor> {
        self.algorithms.lock().unwrap().get(name).cloned()
    }

    /// Create a task with a fresh instance of the named algorithm
    pub fn create_task(
        &self,
        source: impl AsRef<Path>,
        dest: impl AsRef<Path>,
        algorithm_name: &str,
    ) -> Result<Arc<CopyTask>> {
        let descriptor = self
            .algorithm_descriptor(algorithm_name)
            .ok_or_else(|| CopyError::UnknownAlgorithm(algorithm_name.to_string()))?;

        let hooks = self.hooks.lock().unwrap().clone();
        let task = Arc::new(CopyTask::new(
            source.as_ref(),
            dest.as_ref(),
            (descriptor.factory)(),
            hooks,
        ));
        self.tasks.lock().unwrap().push(task.clone());
        debug!(source = %source.as_ref().display(), algorithm = algorithm_name, "task created");
        Ok(task)
    }

    fn contains(&self, task: &Arc<CopyTask>) -> bool {
        self.tasks.lock().unwrap().iter().any(|t| Arc::ptr_eq(t, task))
    }

    /// Start a task; fails with [`CopyError::Busy`] while another task is
    /// active (not yet terminal).
    pub fn start_task(&self, task: &Arc<CopyTask>) -> Result<()> {
        if !self.contains(task) {
            return Err(CopyError::UnknownTask);
        }

        let mut active = self.active.lock().unwrap();
        if let Some(current) = active.as_ref()
            && !Arc::ptr_eq(current, task)
            && !current.state().is_terminal()
        {
            return Err(CopyError::Busy);
        }

        *active = Some(task.clone());
        task.start();
        Ok(())
    }

    pub fn pause_task(&self, task: &Arc<CopyTask>) -> Result<()> {
        if !self.contains(task) {
            return Err(CopyError::UnknownTask);
        }
        task.pause();
        Ok(())
    }

    pub fn resume_task(&self, task: &Arc<CopyTask>) -> Result<()> {
        if !self.contains(task) {
            return Err(CopyError::UnknownTask);
        }
        task.resume();
        Ok(())
    }

    pub fn stop_task(&self, task: &Arc<CopyTask>) -> Result<()> {
        if !self.contains(task) {
            return Err(CopyError::UnknownTask);
        }
        task.stop();

        let mut active = self.active.lock().unwrap();
        if active.as_ref().is_some_and(|t| Arc::ptr_eq(t, task)) {
            *active = None;
        }
        Ok(())
    }

    /// Stop (if needed) and forget a task
    pub fn remove_task(&self, task: &Arc<CopyTask>) -> Result<()> {
        if !self.contains(task) {
            return Err(CopyError::UnknownTask);
        }

        if matches!(task.state(), TaskState::Running | TaskState::Paused) {
            task.stop();
        }
        self.tasks.lock().unwrap().retain(|t| !Arc::ptr_eq(t, task));

        let mut active = self.active.lock().unwrap();
        if active.as_ref().is_some_and(|t| Arc::ptr_eq(t, task)) {
            *active = None;
        }
        Ok(())
    }

    /// Drop every task that reached a terminal state
    pub fn clear_completed(&self) {
        let mut active = self.active.lock().unwrap();
        if active.as_ref().is_some_and(|t| t.state().is_terminal()) {
            *active = None;
        }
        drop(active);

        self.tasks.lock().unwrap().retain(|t| !t.state().is_terminal());
    }

    /// Stop every running or paused task
    pub fn stop_all(&self) {
        for task in self.tasks.lock().unwrap().iter() {
            if matches!(task.state(), TaskState::Running | TaskState::Paused) {
                task.stop();
            }
        }
        *self.active.lock().unwrap() = None;
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn active_task(&self) -> Option<Arc<CopyTask>> {
        self.active.lock().unwrap().clone()
    }

    pub fn tasks(&self) -> Vec<Arc<CopyTask>> {
        self.tasks.lock().unwrap().clone()
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}
