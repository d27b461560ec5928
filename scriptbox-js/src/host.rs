//! Running one job on a fresh interpreter

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use boa_engine::{Context, Source};
use scriptbox_config::ScriptboxConfig;
use scriptbox_ipc::{JobRequest, JobResponse};
use scriptbox_state::{Builtins, CacheLimits, VariableStateCache, VariableStore};
use tracing::{debug, trace};

use crate::bindings::{Helpers, JsHost};
use crate::error::HostResult;
use crate::output::LimitedOutput;
use crate::scope::{self, ActiveRun, RunState};

const WARMUP_SOURCE: &str = "1+1";

/// Worker-side limits
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub max_output_chars: usize,
    pub max_output_lines: usize,
    pub recursion_limit: usize,
    pub limits: CacheLimits,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::from_config(&ScriptboxConfig::default())
    }
}

impl HostConfig {
    pub fn from_config(config: &ScriptboxConfig) -> Self {
        Self {
            max_output_chars: config.execution.max_output_chars,
            max_output_lines: config.execution.max_output_lines,
            recursion_limit: config.execution.recursion_limit,
            limits: CacheLimits::from(&config.storage),
        }
    }
}

/// Runs scripts against a variable store
///
/// Cheap to share; every call to [`ScriptHost::run`] builds its own
/// interpreter on the calling thread. Runs block on storage, so call it from
/// a blocking context.
pub struct ScriptHost {
    store: Arc<dyn VariableStore>,
    config: HostConfig,
}

impl ScriptHost {
    pub fn new(store: Arc<dyn VariableStore>, config: HostConfig) -> Self {
        Self { store, config }
    }

    /// Run a job; script and storage errors become part of the output
    pub fn run(&self, request: &JobRequest) -> JobResponse {
        let output = Rc::new(RefCell::new(LimitedOutput::new(
            self.config.max_output_chars,
            self.config.max_output_lines,
        )));

        if let Err(e) = self.execute(request, &output) {
            debug!(error = %e, "Script failed");
            output.borrow_mut().write_line(&format!("EXCEPTION: {}", e));
        }

        let output = output.borrow();
        if output.is_truncated() {
            trace!("Script output truncated");
        }
        JobResponse::text(output.text())
    }

    /// Load the interpreter once so the first real job does not pay for it
    pub fn warm_up(&self) {
        let request = JobRequest {
            service: "warmup".to_string(),
            user_id: "0".to_string(),
            user_name: "warmup".to_string(),
            source: WARMUP_SOURCE.to_string(),
        };
        let response = self.run(&request);
        trace!(output = %response.output, "Interpreter warmed up");
    }

    fn execute(&self, request: &JobRequest, output: &Rc<RefCell<LimitedOutput>>) -> HostResult<()> {
        let builtins = Builtins::new(&request.service, &request.user_id, &request.user_name);
        let cache = VariableStateCache::begin(self.store.as_ref(), builtins, self.config.limits)?;

        let mut context = Context::default();
        context
            .runtime_limits_mut()
            .set_recursion_limit(self.config.recursion_limit);
        scope::install(&mut context)?;
        let helpers = Helpers::install(&mut context)?;

        let run = Rc::new(RunState {
            cache,
            helpers,
            output: output.clone(),
        });
        let _active = ActiveRun::enter(run.clone());

        let source = format!("with (__vars) {{\n{}\n}}", request.source);
        let completion = match context.eval(Source::from_bytes(&source)) {
            Ok(value) => value,
            Err(e) => {
                run.cache.rollback();
                return Err(e.into());
            }
        };

        if !completion.is_undefined() {
            let text = run.helpers.render(&completion, &mut context)?;
            output.borrow_mut().write_line(&text);
        }

        let mut host = JsHost::new(&mut context, &run.helpers);
        let report = run.cache.commit(&mut host)?;
        debug!(
            written = report.written.len(),
            unchanged = report.unchanged.len(),
            "Committed variables"
        );
        Ok(())
    }
}
