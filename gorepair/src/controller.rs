//! Repair loop controller.
//!
//! For each step of a file's plan the controller prompts the oracle, applies
//! the response through the patch engine, then builds (and tests, when the
//! test file is involved). Failures become corrective prompts until the step's
//! attempts run out.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::errors::{AttemptsExhaustedError, PatchError};
use crate::core::failed_tests::{failed_tests, test_code};
use crate::core::locator::{extract_line_number, locate_in_source, parse_diagnostics};
use crate::core::merge::{MergeReport, merge};
use crate::core::parser::parse;
use crate::core::render::{Formatter, ImportStyle, render, render_text};
use crate::core::response::{FilePatch, ResponseTargets, split_response};
use crate::core::steps::{
    FileClass, PromptTemplate, StepDefinition, StepId, StepTarget, classify, plan_for,
    source_file_for, test_file_for,
};
use crate::core::unused_imports::{resolve, unused_imports_by_file};
use crate::io::attempt_log::{AttemptMeta, AttemptOutcome, AttemptRecord, write_attempt};
use crate::io::config::{GorepairConfig, OnExhaustion};
use crate::io::files::SourceTree;
use crate::io::oracle::{Oracle, OracleRequest};
use crate::io::prompt::{LocatedCode, PromptBuilder, PromptInputs, PromptKind};
use crate::io::toolchain::Toolchain;

/// Diagnostics quoted in one corrective prompt.
const MAX_LOCATED: usize = 5;

/// Package used when neither file declares one.
const DEFAULT_PACKAGE: &str = "main";

/// Mutable state of one job, owned by the controller for a single plan traversal.
#[derive(Debug, Clone)]
pub struct JobState {
    pub session: String,
    pub request: String,
    pub step: StepId,
    /// Source file, relative to the module root.
    pub file: String,
    pub test_file: String,
    pub source: String,
    pub test_source: Option<String>,
    /// Signatures of functions created during this job, deduplicated.
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub attempt: u32,
    /// Attempts made across all steps; numbers the artifact directories.
    seq: u32,
}

impl JobState {
    fn load(session: &str, request: &str, file: &str, tree: &SourceTree) -> Result<Self> {
        let source_name = source_file_for(file);
        let test_name = test_file_for(file);
        Ok(Self {
            session: session.to_string(),
            request: request.to_string(),
            step: StepId::Start,
            source: tree.read(&source_name)?.unwrap_or_default(),
            test_source: tree.read(&test_name)?,
            file: source_name,
            test_file: test_name,
            created: Vec::new(),
            updated: Vec::new(),
            attempt: 0,
            seq: 0,
        })
    }

    /// Package clause of the source file, else of the test file.
    pub fn package(&self) -> String {
        std::iter::once(self.source.as_str())
            .chain(self.test_source.as_deref())
            .filter_map(|text| parse(text).ok().and_then(|unit| unit.package))
            .find(|pkg| !pkg.is_empty())
            .map(|pkg| pkg.trim_end_matches("_test").to_string())
            .unwrap_or_else(|| DEFAULT_PACKAGE.to_string())
    }

    /// Created signatures followed by updated ones not already listed.
    pub fn functions(&self) -> Vec<String> {
        let mut all = self.created.clone();
        for sig in &self.updated {
            if !all.contains(sig) {
                all.push(sig.clone());
            }
        }
        all
    }

    fn record(&mut self, report: &MergeReport) {
        for sig in &report.created {
            if !self.created.contains(sig) {
                self.created.push(sig.clone());
            }
        }
        for sig in &report.updated {
            if !self.created.contains(sig) && !self.updated.contains(sig) {
                self.updated.push(sig.clone());
            }
        }
    }

    /// Map a file name from oracle or toolchain output onto the job's files.
    ///
    /// Paths match on the module-relative path (or an absolute path ending in
    /// it). A bare file name, as `go test` prints it, matches by base name.
    fn canonical_name(&self, name: &str) -> String {
        let name = name.strip_prefix("./").unwrap_or(name);
        for known in [&self.file, &self.test_file] {
            let same_path = name == known.as_str()
                || name
                    .strip_suffix(known.as_str())
                    .is_some_and(|prefix| prefix.ends_with('/'));
            let same_bare_name = !name.contains('/') && name == base_name(known);
            if same_path || same_bare_name {
                return known.clone();
            }
        }
        name.to_string()
    }

    fn buffer(&self, name: &str) -> Option<&str> {
        if name == self.file {
            Some(self.source.as_str())
        } else if name == self.test_file {
            self.test_source.as_deref()
        } else {
            None
        }
    }

    fn set_buffer(&mut self, name: &str, text: String) {
        if name == self.file {
            self.source = text;
        } else if name == self.test_file {
            self.test_source = Some(text);
        }
    }
}

fn base_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Result of one step of the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub step: StepId,
    pub passed: bool,
    /// Oracle calls spent on the step.
    pub attempts: u32,
}

/// Summary of a job: one plan traversal for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub file: String,
    pub steps: Vec<StepResult>,
    pub created: Vec<String>,
    pub updated: Vec<String>,
    /// Functions reported unused after a successful plan.
    pub unused: Vec<String>,
}

impl JobOutcome {
    pub fn passed(&self) -> bool {
        !self.steps.is_empty() && self.steps.iter().all(|s| s.passed)
    }
}

/// Edited file held in memory until every pair of a response has been applied.
struct StagedFile {
    name: String,
    text: String,
    report: MergeReport,
}

/// What one attempt produced.
struct Check {
    outcome: AttemptOutcome,
    files: Vec<String>,
    report: MergeReport,
    log: String,
    /// Corrective prompt for the next attempt; `None` when the attempt passed.
    next_prompt: Option<String>,
}

impl Check {
    fn new(outcome: AttemptOutcome) -> Self {
        Self {
            outcome,
            files: Vec::new(),
            report: MergeReport::default(),
            log: String::new(),
            next_prompt: None,
        }
    }
}

/// Drives step plans against one module.
pub struct Repairer<'a, O, T, F> {
    tree: SourceTree,
    cfg: &'a GorepairConfig,
    oracle: &'a O,
    toolchain: &'a T,
    formatter: &'a F,
    prompts: PromptBuilder,
    style: ImportStyle,
}

impl<'a, O: Oracle, T: Toolchain, F: Formatter> Repairer<'a, O, T, F> {
    pub fn new(
        root: &Path,
        cfg: &'a GorepairConfig,
        oracle: &'a O,
        toolchain: &'a T,
        formatter: &'a F,
    ) -> Result<Self> {
        Ok(Self {
            tree: SourceTree::new(root),
            cfg,
            oracle,
            toolchain,
            formatter,
            prompts: PromptBuilder::new(cfg.prompt_budget_bytes)?,
            style: cfg.imports.style(),
        })
    }

    pub fn config(&self) -> &GorepairConfig {
        self.cfg
    }

    pub fn oracle(&self) -> &O {
        self.oracle
    }

    pub fn prompts(&self) -> &PromptBuilder {
        &self.prompts
    }

    /// Run the plan for `file` against `request`.
    ///
    /// Oracle failures end the job immediately. Exhausted steps either move on
    /// or return [`AttemptsExhaustedError`], depending on `on_exhaustion`.
    #[instrument(skip_all, fields(session = %session, file = %file))]
    pub fn run_job(&self, session: &str, request: &str, file: &str) -> Result<JobOutcome> {
        let class = classify(file);
        let plan = plan_for(class);
        if plan.is_empty() {
            warn!("not a Go file, nothing to do");
            return Ok(JobOutcome {
                file: file.to_string(),
                steps: Vec::new(),
                created: Vec::new(),
                updated: Vec::new(),
                unused: Vec::new(),
            });
        }

        self.toolchain.ensure_module(self.tree.root())?;
        let mut job = JobState::load(session, request, file, &self.tree)?;
        let mut steps = Vec::with_capacity(plan.len());
        for step in &plan {
            let result = self.run_step(&mut job, step)?;
            if !result.passed {
                match self.cfg.on_exhaustion {
                    OnExhaustion::Continue => {
                        warn!(step = %step.id, attempts = result.attempts, "attempts exhausted, moving on");
                    }
                    OnExhaustion::Abort => {
                        return Err(AttemptsExhaustedError {
                            step: step.id,
                            attempts: result.attempts,
                        }
                        .into());
                    }
                }
            }
            steps.push(result);
        }

        let mut unused = Vec::new();
        if class == FileClass::Source && steps.iter().all(|s| s.passed) {
            let path = self.tree.resolve(&job.file)?;
            unused = self.toolchain.find_unused_symbols(&path);
            for name in &unused {
                warn!(function = %name, file = %job.file, "function is unused");
            }
        }

        Ok(JobOutcome {
            file: file.to_string(),
            steps,
            created: std::mem::take(&mut job.created),
            updated: std::mem::take(&mut job.updated),
            unused,
        })
    }

    #[instrument(skip_all, fields(step = %step.id))]
    fn run_step(&self, job: &mut JobState, step: &StepDefinition) -> Result<StepResult> {
        job.step = step.id;
        job.attempt = 0;
        if step.target == StepTarget::Test {
            let header = format!("package {}\n\n", job.package());
            if self.tree.create_if_absent(&job.test_file, &header)? {
                info!(file = %job.test_file, "created test file");
                job.test_source = Some(header);
            }
        }

        let mut prompt = self.initial_prompt(job, step)?;
        for attempt in 1..=self.cfg.max_attempts {
            job.attempt = attempt;
            job.seq += 1;
            let started = Instant::now();
            let attempt_step = job.step;
            debug!(attempt, state = %attempt_step, "calling oracle");

            let request = OracleRequest::new(prompt.as_str(), &self.cfg.oracle);
            let response = match self.oracle.generate(&request) {
                Ok(response) => response,
                Err(err) => {
                    let mut check = Check::new(AttemptOutcome::OracleFailed);
                    check.log = err.to_string();
                    self.log_attempt(job, attempt_step, started, &prompt, None, &check)?;
                    return Err(anyhow::Error::new(err))
                        .with_context(|| format!("oracle failed during {attempt_step}"));
                }
            };

            let check = self.apply_and_check(job, step, &response)?;
            self.log_attempt(job, attempt_step, started, &prompt, Some(&response), &check)?;
            match check.next_prompt {
                None => {
                    info!(attempt, "step passed");
                    return Ok(StepResult {
                        step: step.id,
                        passed: true,
                        attempts: attempt,
                    });
                }
                Some(next) => {
                    debug!(attempt, outcome = ?check.outcome, "attempt failed");
                    prompt = next;
                }
            }
        }

        Ok(StepResult {
            step: step.id,
            passed: false,
            attempts: self.cfg.max_attempts,
        })
    }

    fn initial_prompt(&self, job: &JobState, step: &StepDefinition) -> Result<String> {
        let mut inputs = self.base_inputs(job);
        inputs.target = match step.target {
            StepTarget::Source => job.file.clone(),
            StepTarget::Test => job.test_file.clone(),
        };
        let kind = match step.template {
            PromptTemplate::Start => PromptKind::Start,
            PromptTemplate::Optimize => {
                inputs.functions = job.functions();
                PromptKind::Optimize
            }
            PromptTemplate::AddTests => {
                inputs.functions = job.created.clone();
                PromptKind::AddTests
            }
        };
        if kind != PromptKind::Start && inputs.functions.is_empty() {
            inputs.functions = all_signatures(&job.source);
        }
        self.prompts.build(kind, &inputs)
    }

    fn base_inputs(&self, job: &JobState) -> PromptInputs {
        PromptInputs {
            request: job.request.clone(),
            target: job.file.clone(),
            file: job.file.clone(),
            source: job.source.clone(),
            test_file: job.test_file.clone(),
            test_source: job.test_source.clone(),
            package: job.package(),
            ..PromptInputs::default()
        }
    }

    fn apply_and_check(
        &self,
        job: &mut JobState,
        step: &StepDefinition,
        response: &str,
    ) -> Result<Check> {
        let default = match step.target {
            StepTarget::Source => job.file.as_str(),
            StepTarget::Test => job.test_file.as_str(),
        };
        let targets = ResponseTargets {
            source: &job.file,
            test: &job.test_file,
            default,
        };
        let patches: Vec<FilePatch> = split_response(response, &targets)
            .into_iter()
            .map(|patch| FilePatch {
                file: job.canonical_name(&patch.file),
                code: patch.code,
            })
            .collect();

        let staged = match self.stage(job, &patches) {
            Ok(staged) => staged,
            Err(err) => match err.downcast::<PatchError>() {
                Ok(patch_err) => return self.patch_rejected(job, &patches, &patch_err),
                Err(other) => return Err(other),
            },
        };

        let mut check = Check::new(AttemptOutcome::Passed);
        for file in staged {
            self.tree.write(&file.name, &file.text)?;
            job.set_buffer(&file.name, file.text);
            job.record(&file.report);
            check.report.created.extend(file.report.created);
            check.report.updated.extend(file.report.updated);
            check.files.push(file.name);
        }
        let touched_test = check.files.contains(&job.test_file);
        self.run_toolchain(job, step, touched_test, check)
    }

    /// Parse, merge and render every pair before anything is written.
    fn stage(&self, job: &JobState, patches: &[FilePatch]) -> Result<Vec<StagedFile>> {
        let mut staged: Vec<StagedFile> = Vec::new();
        for patch in patches {
            let patch_unit = parse(&patch.code).map_err(|source| PatchError::Parse {
                file: patch.file.clone(),
                source,
            })?;
            let existing = staged.iter().position(|f| f.name == patch.file);
            let base_text = match existing {
                Some(idx) => staged[idx].text.clone(),
                None => self.text_of(job, &patch.file)?.unwrap_or_default(),
            };
            let base = parse(&base_text).with_context(|| format!("parse {}", patch.file))?;

            let mut merged = merge(&base, &patch_unit);
            if merged.unit.package.is_none() {
                merged.unit.package = Some(job.package());
            }
            let text = render(&merged.unit, &self.style, self.formatter).map_err(|source| {
                PatchError::Format {
                    file: patch.file.clone(),
                    rendered: render_text(&merged.unit, &self.style),
                    source,
                }
            })?;

            match existing {
                Some(idx) => {
                    let file = &mut staged[idx];
                    file.text = text;
                    file.report.created.extend(merged.report.created);
                    file.report.updated.extend(merged.report.updated);
                }
                None => staged.push(StagedFile {
                    name: patch.file.clone(),
                    text,
                    report: merged.report,
                }),
            }
        }
        Ok(staged)
    }

    fn patch_rejected(
        &self,
        job: &JobState,
        patches: &[FilePatch],
        err: &PatchError,
    ) -> Result<Check> {
        warn!(file = %err.file(), error = %err, "patch rejected, nothing written");
        let code = match err {
            PatchError::Format { rendered, .. } => rendered.clone(),
            PatchError::Parse { file, .. } => patches
                .iter()
                .find(|p| &p.file == file)
                .map(|p| p.code.clone())
                .unwrap_or_default(),
        };
        let inputs = PromptInputs {
            patch_file: err.file().to_string(),
            patch_error: err.to_string(),
            patch_code: code,
            ..self.base_inputs(job)
        };
        let mut check = Check::new(AttemptOutcome::PatchRejected);
        check.log = err.to_string();
        check.next_prompt = Some(self.prompts.build(PromptKind::FixPatch, &inputs)?);
        Ok(check)
    }

    fn run_toolchain(
        &self,
        job: &mut JobState,
        step: &StepDefinition,
        touched_test: bool,
        mut check: Check,
    ) -> Result<Check> {
        let root = self.tree.root();
        match self.toolchain.sync_dependencies(root) {
            Ok(true) => {}
            Ok(false) => debug!("dependency sync reported failure"),
            Err(err) => warn!(error = %format!("{err:#}"), "dependency sync failed"),
        }
        for name in &check.files {
            let path = self.tree.resolve(name)?;
            match self.toolchain.fix_imports(&path) {
                Ok(true) => {
                    if let Some(text) = self.tree.read(name)? {
                        job.set_buffer(name, text);
                    }
                }
                Ok(false) => {}
                Err(err) => warn!(file = %name, error = %format!("{err:#}"), "import fix failed"),
            }
        }

        let mut build = self.toolchain.build(root)?;
        check.log.push_str(&format!("$ go build ./...\n{}\n", build.output));
        if !build.ok {
            job.step = step.on_error;
            if self.remove_unused_imports(job, &build.output)? > 0 {
                build = self.toolchain.build(root)?;
                check.log.push_str(&format!("$ go build ./...\n{}\n", build.output));
            }
            if !build.ok {
                let inputs = PromptInputs {
                    output: build.output.clone(),
                    located: self.locate(job, &build.output),
                    ..self.base_inputs(job)
                };
                check.outcome = AttemptOutcome::BuildFailed;
                check.next_prompt = Some(self.prompts.build(PromptKind::FixBuild, &inputs)?);
                return Ok(check);
            }
        }

        if touched_test || step.target == StepTarget::Test {
            let mut tests = self.toolchain.test(root)?;
            check.log.push_str(&format!("$ go test ./...\n{}\n", tests.output));
            if !tests.ok && self.remove_unused_imports(job, &tests.output)? > 0 {
                tests = self.toolchain.test(root)?;
                check.log.push_str(&format!("$ go test ./...\n{}\n", tests.output));
            }
            if !tests.ok {
                job.step = StepId::AddTestsError;
                let failing = failed_tests(&tests.output);
                let code = job
                    .test_source
                    .as_deref()
                    .and_then(|text| parse(text).ok())
                    .map(|unit| test_code(&unit, &failing))
                    .unwrap_or_default();
                let inputs = PromptInputs {
                    output: tests.output.clone(),
                    located: self.locate(job, &tests.output),
                    failing,
                    test_code: code,
                    ..self.base_inputs(job)
                };
                check.outcome = AttemptOutcome::TestsFailed;
                check.next_prompt = Some(self.prompts.build(PromptKind::FixTests, &inputs)?);
                return Ok(check);
            }
        }

        Ok(check)
    }

    /// Strip imports the toolchain reports unused. Returns how many were removed.
    fn remove_unused_imports(&self, job: &mut JobState, output: &str) -> Result<usize> {
        let mut removed_total = 0;
        for (reported, paths) in unused_imports_by_file(output) {
            let name = if reported.is_empty() {
                job.file.clone()
            } else {
                job.canonical_name(&reported)
            };
            let Some(text) = self.text_of(job, &name)? else {
                continue;
            };
            let unit = match parse(&text) {
                Ok(unit) => unit,
                Err(err) => {
                    debug!(file = %name, error = %err, "skip unused imports: file does not parse");
                    continue;
                }
            };
            let (unit, removed) = resolve(unit, &paths);
            if removed == 0 {
                continue;
            }
            let rendered = match render(&unit, &self.style, self.formatter) {
                Ok(rendered) => rendered,
                Err(err) => {
                    debug!(file = %name, error = %err, "skip unused imports: format failed");
                    continue;
                }
            };
            self.tree.write(&name, &rendered)?;
            job.set_buffer(&name, rendered);
            info!(file = %name, removed, "removed unused imports");
            removed_total += removed;
        }
        Ok(removed_total)
    }

    /// Pair diagnostics in `output` with the declarations they point into.
    fn locate(&self, job: &JobState, output: &str) -> Vec<LocatedCode> {
        let mut located: Vec<LocatedCode> = Vec::new();
        for diag in parse_diagnostics(output) {
            let name = job.canonical_name(&diag.file);
            let Some(text) = self.text_of(job, &name).ok().flatten() else {
                continue;
            };
            let code = locate_in_source(&text, diag.line);
            if let Some(seen) = located.iter_mut().find(|l| l.file == name && l.code == code) {
                seen.message.push_str("; ");
                seen.message.push_str(&diag.message);
                continue;
            }
            if located.len() == MAX_LOCATED {
                break;
            }
            located.push(LocatedCode {
                file: name,
                line: diag.line,
                message: diag.message,
                code,
            });
        }

        if located.is_empty()
            && let Some(line) = extract_line_number(output)
        {
            located.push(LocatedCode {
                file: job.file.clone(),
                line,
                message: output.lines().next().unwrap_or_default().trim().to_string(),
                code: locate_in_source(&job.source, line),
            });
        }
        located
    }

    fn text_of(&self, job: &JobState, name: &str) -> Result<Option<String>> {
        match job.buffer(name) {
            Some(text) => Ok(Some(text.to_string())),
            None => self.tree.read(name),
        }
    }

    fn log_attempt(
        &self,
        job: &JobState,
        step: StepId,
        started: Instant,
        prompt: &str,
        response: Option<&str>,
        check: &Check,
    ) -> Result<()> {
        let meta = AttemptMeta {
            session: job.session.clone(),
            seq: job.seq,
            step,
            attempt: job.attempt,
            outcome: check.outcome,
            files: check.files.clone(),
            report: check.report.clone(),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        write_attempt(&AttemptRecord {
            root: self.tree.root(),
            meta: &meta,
            prompt,
            response,
            toolchain_log: (!check.log.is_empty()).then_some(check.log.as_str()),
        })?;
        Ok(())
    }
}

/// Signature lines of every function in `source`.
fn all_signatures(source: &str) -> Vec<String> {
    parse(source)
        .map(|unit| {
            unit.functions()
                .map(|decl| decl.signature.clone().unwrap_or_else(|| decl.name.clone()))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::OracleError;
    use crate::test_support::{
        PassthroughFormatter, RejectingFormatter, ScriptedOracle, ScriptedToolchain, TempModule,
        failed, passed,
    };

    const CALC: &str = "package calc\n\nfunc Add(a, b int) int {\n\treturn a - b\n}\n";
    const FIX_ADD: &str = "**calc.go**\n```go\nfunc Add(a, b int) int {\n\treturn a + b\n}\n```\n";
    const ADD_TEST: &str = "**calc_test.go**\n```go\nimport \"testing\"\n\nfunc TestAdd(t *testing.T) {\n\tif Add(1, 2) != 3 {\n\t\tt.Fatal(\"bad\")\n\t}\n}\n```\n";

    fn module() -> TempModule {
        let module = TempModule::new().expect("module");
        module.write("calc.go", CALC).expect("seed");
        module
    }

    fn config(max_attempts: u32, on_exhaustion: OnExhaustion) -> GorepairConfig {
        GorepairConfig {
            max_attempts,
            on_exhaustion,
            ..GorepairConfig::default()
        }
    }

    /// Verifies a clean run patches the source, creates the test file and runs tests once.
    #[test]
    fn source_plan_runs_all_steps() {
        let module = module();
        let cfg = config(3, OnExhaustion::Continue);
        let oracle = ScriptedOracle::replies(&[FIX_ADD, FIX_ADD, ADD_TEST]);
        let toolchain = ScriptedToolchain::new().with_unused(&["helper"]);
        let repairer =
            Repairer::new(module.root(), &cfg, &oracle, &toolchain, &PassthroughFormatter)
                .expect("repairer");

        let outcome = repairer.run_job("s1", "fix Add", "calc.go").expect("job");

        assert!(outcome.passed());
        let ids: Vec<StepId> = outcome.steps.iter().map(|s| s.step).collect();
        assert_eq!(ids, vec![StepId::Start, StepId::Optimize, StepId::AddTests]);
        assert_eq!(oracle.calls(), 3);
        assert_eq!(toolchain.count("test"), 1);
        assert_eq!(outcome.updated, vec!["func Add(a, b int) int"]);
        assert_eq!(outcome.unused, vec!["helper"]);

        let source = module.read("calc.go").expect("read");
        assert_eq!(source.matches("return a + b").count(), 1);
        assert!(!source.contains("return a - b"));
        let tests = module.read("calc_test.go").expect("read tests");
        assert!(tests.starts_with("package calc"));
        assert!(tests.contains("func TestAdd(t *testing.T)"));
        assert!(oracle.prompts()[1].contains("func Add(a, b int) int"));
    }

    /// Verifies the oracle is called at most `max_attempts` times for a failing step.
    #[test]
    fn attempts_are_bounded_per_step() {
        let module = module();
        module.write("calc_test.go", "package calc\n").expect("seed");
        let cfg = config(3, OnExhaustion::Continue);
        let oracle = ScriptedOracle::replies(&[ADD_TEST, ADD_TEST, ADD_TEST, ADD_TEST]);
        let toolchain = ScriptedToolchain::new().with_builds(vec![
            failed("./calc.go:4:9: undefined: x\n"),
            failed("./calc.go:4:9: undefined: y\n"),
            failed("./calc.go:4:9: undefined: z\n"),
        ]);
        let repairer =
            Repairer::new(module.root(), &cfg, &oracle, &toolchain, &PassthroughFormatter)
                .expect("repairer");

        let outcome = repairer.run_job("s1", "add tests", "calc_test.go").expect("job");

        assert_eq!(oracle.calls(), 3);
        assert_eq!(
            outcome.steps,
            vec![StepResult {
                step: StepId::Start,
                passed: false,
                attempts: 3
            }]
        );
        let prompts = oracle.prompts();
        assert!(prompts[1].contains("undefined: x"));
        assert!(prompts[1].contains("return a - b"), "located code is quoted");
        assert!(prompts[2].contains("undefined: y"));

        let sessions = module.root().join(".gorepair/sessions/s1");
        assert!(sessions.join("01-start-1/meta.json").is_file());
        assert!(sessions.join("02-add_tests_error-2/toolchain.log").is_file());
        assert!(sessions.join("03-add_tests_error-3/response.md").is_file());
    }

    /// Verifies an oracle error ends the job after a single call.
    #[test]
    fn oracle_error_is_not_retried() {
        let module = module();
        let cfg = config(3, OnExhaustion::Continue);
        let oracle = ScriptedOracle::new(vec![Err(OracleError::Api {
            code: "rate_limit".to_string(),
            message: "slow down".to_string(),
        })]);
        let toolchain = ScriptedToolchain::new();
        let repairer =
            Repairer::new(module.root(), &cfg, &oracle, &toolchain, &PassthroughFormatter)
                .expect("repairer");

        let err = repairer.run_job("s1", "fix Add", "calc.go").expect_err("fails");

        assert!(err.downcast_ref::<OracleError>().is_some());
        assert_eq!(oracle.calls(), 1);
        assert_eq!(toolchain.count("build"), 0);
        let meta = module
            .read(".gorepair/sessions/s1/01-start-1/meta.json")
            .expect("meta");
        assert!(meta.contains("oracle_failed"));
    }

    /// Verifies an unparseable pair leaves every file untouched and asks for a fix.
    #[test]
    fn parse_error_writes_nothing_and_requests_fix() {
        let module = module();
        let cfg = config(2, OnExhaustion::Abort);
        let two_files = "**calc.go**\n```go\nfunc Add(a, b int) int {\n\treturn a + b\n}\n```\n\n**calc_test.go**\n```go\nfunc Broken( {\n```\n";
        let oracle = ScriptedOracle::replies(&[two_files, two_files]);
        let toolchain = ScriptedToolchain::new();
        let repairer =
            Repairer::new(module.root(), &cfg, &oracle, &toolchain, &PassthroughFormatter)
                .expect("repairer");

        let err = repairer.run_job("s1", "fix Add", "calc.go").expect_err("exhausted");

        let exhausted = err
            .downcast_ref::<AttemptsExhaustedError>()
            .expect("exhaustion error");
        assert_eq!(exhausted.step, StepId::Start);
        assert_eq!(exhausted.attempts, 2);
        assert_eq!(module.read("calc.go").expect("read"), CALC);
        assert!(!module.root().join("calc_test.go").exists());
        assert_eq!(toolchain.count("build"), 0);
        let prompts = oracle.prompts();
        assert!(prompts[1].contains("could not be applied"));
        assert!(prompts[1].contains("func Broken( {"));
    }

    /// Verifies a formatter rejection is fed back as a patch error.
    #[test]
    fn format_error_requests_fix() {
        let module = module();
        let cfg = config(1, OnExhaustion::Continue);
        let oracle = ScriptedOracle::replies(&[FIX_ADD, FIX_ADD, ADD_TEST]);
        let toolchain = ScriptedToolchain::new();
        let repairer =
            Repairer::new(module.root(), &cfg, &oracle, &toolchain, &RejectingFormatter)
                .expect("repairer");

        let outcome = repairer.run_job("s1", "fix Add", "calc.go").expect("job");

        assert!(outcome.steps.iter().all(|s| !s.passed));
        assert_eq!(oracle.calls(), 3);
        assert_eq!(module.read("calc.go").expect("read"), CALC);
        assert!(outcome.unused.is_empty());
        assert_eq!(toolchain.count("find_unused_symbols"), 0);
    }

    /// Verifies abort mode stops the plan at the first exhausted step.
    #[test]
    fn abort_on_exhaustion_stops_the_plan() {
        let module = module();
        let cfg = config(2, OnExhaustion::Abort);
        let oracle = ScriptedOracle::replies(&[FIX_ADD, FIX_ADD, FIX_ADD]);
        let toolchain = ScriptedToolchain::new().with_builds(vec![
            failed("./calc.go:4:9: undefined: x\n"),
            failed("./calc.go:4:9: undefined: x\n"),
        ]);
        let repairer =
            Repairer::new(module.root(), &cfg, &oracle, &toolchain, &PassthroughFormatter)
                .expect("repairer");

        let err = repairer.run_job("s1", "fix Add", "calc.go").expect_err("abort");

        assert!(err.downcast_ref::<AttemptsExhaustedError>().is_some());
        assert_eq!(oracle.calls(), 2);
    }

    /// Verifies unused imports are removed and the build rerun within one attempt.
    #[test]
    fn unused_imports_are_removed_before_retrying() {
        let module = TempModule::new().expect("module");
        module
            .write("calc.go", "package calc\n\nimport \"strings\"\n\nfunc Add(a, b int) int {\n\treturn a - b\n}\n")
            .expect("seed");
        let cfg = config(1, OnExhaustion::Abort);
        let oracle = ScriptedOracle::replies(&[FIX_ADD, FIX_ADD, ADD_TEST]);
        let toolchain = ScriptedToolchain::new().with_builds(vec![
            failed("# example.com/demo\n./calc.go:3:8: \"strings\" imported and not used\n"),
            passed(),
        ]);
        let repairer =
            Repairer::new(module.root(), &cfg, &oracle, &toolchain, &PassthroughFormatter)
                .expect("repairer");

        let outcome = repairer.run_job("s1", "fix Add", "calc.go").expect("job");

        assert!(outcome.passed());
        assert_eq!(oracle.calls(), 3);
        let source = module.read("calc.go").expect("read");
        assert!(!source.contains("strings"));
        assert!(!source.contains("import"));
    }

    /// Verifies a test failure routes to the add-tests error state with the failing test's code.
    #[test]
    fn test_failure_prompts_with_failing_test_code() {
        let module = module();
        module
            .write("calc_test.go", "package calc\n\nimport \"testing\"\n\nfunc TestAdd(t *testing.T) {\n\tt.Fatal(\"bad\")\n}\n\nfunc TestOther(t *testing.T) {}\n")
            .expect("seed");
        let cfg = config(3, OnExhaustion::Abort);
        let oracle = ScriptedOracle::replies(&[ADD_TEST, ADD_TEST]);
        let toolchain = ScriptedToolchain::new().with_tests(vec![failed(
            "--- FAIL: TestAdd (0.00s)\n    calc_test.go:7: bad\nFAIL\n",
        )]);
        let repairer =
            Repairer::new(module.root(), &cfg, &oracle, &toolchain, &PassthroughFormatter)
                .expect("repairer");

        let outcome = repairer.run_job("s1", "add tests", "calc_test.go").expect("job");

        assert!(outcome.passed());
        assert_eq!(outcome.steps[0].attempts, 2);
        let retry = &oracle.prompts()[1];
        assert!(retry.contains("- `TestAdd`"));
        assert!(retry.contains("if Add(1, 2) != 3"));
        assert!(!retry.contains("func TestOther"));
        assert!(
            module
                .root()
                .join(".gorepair/sessions/s1/02-add_tests_error-2/prompt.md")
                .is_file()
        );
    }

    /// Verifies non-Go files get an empty plan and never reach the oracle.
    #[test]
    fn other_files_are_skipped() {
        let module = module();
        let cfg = GorepairConfig::default();
        let oracle = ScriptedOracle::replies(&[]);
        let toolchain = ScriptedToolchain::new();
        let repairer =
            Repairer::new(module.root(), &cfg, &oracle, &toolchain, &PassthroughFormatter)
                .expect("repairer");

        let outcome = repairer.run_job("s1", "anything", "README.md").expect("job");

        assert!(outcome.steps.is_empty());
        assert!(!outcome.passed());
        assert_eq!(oracle.calls(), 0);
        assert!(toolchain.calls().is_empty());
    }

    /// Verifies the job deduplicates recorded signatures and maps output file names.
    #[test]
    fn job_records_created_and_updated_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tree = SourceTree::new(temp.path());
        let mut job = JobState::load("s", "r", "calc.go", &tree).expect("load");
        job.record(&MergeReport {
            created: vec!["func A()".to_string()],
            updated: vec!["func B()".to_string()],
        });
        job.record(&MergeReport {
            created: vec!["func A()".to_string()],
            updated: vec!["func A()".to_string(), "func B()".to_string()],
        });
        assert_eq!(job.created, vec!["func A()"]);
        assert_eq!(job.updated, vec!["func B()"]);
        assert_eq!(job.functions(), vec!["func A()", "func B()"]);
        assert_eq!(job.package(), "main");
        assert_eq!(job.canonical_name("./calc.go"), "calc.go");
        assert_eq!(job.canonical_name("other.go"), "other.go");
    }

    /// Verifies files in other directories with the same base name stay distinct.
    #[test]
    fn canonical_name_matches_relative_paths() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tree = SourceTree::new(temp.path());
        let job = JobState::load("s", "r", "a/util.go", &tree).expect("load");
        assert_eq!(job.canonical_name("./a/util.go"), "a/util.go");
        assert_eq!(job.canonical_name("/work/mod/a/util.go"), "a/util.go");
        assert_eq!(job.canonical_name("util_test.go"), "a/util_test.go");
        assert_eq!(job.canonical_name("b/util.go"), "b/util.go");
        assert_eq!(job.canonical_name("xa/util.go"), "xa/util.go");
    }

    /// Verifies unused imports reported by the test run are removed and the tests rerun.
    #[test]
    fn unused_imports_are_removed_after_failed_tests() {
        let module = module();
        module
            .write("calc_test.go", "package calc\n\nimport \"strings\"\n")
            .expect("seed");
        let cfg = config(1, OnExhaustion::Abort);
        let oracle = ScriptedOracle::replies(&[ADD_TEST]);
        let toolchain = ScriptedToolchain::new().with_tests(vec![failed(
            "# example.com/demo [example.com/demo.test]\n./calc_test.go:3:8: \"strings\" imported and not used\nFAIL\texample.com/demo [build failed]\n",
        )]);
        let repairer =
            Repairer::new(module.root(), &cfg, &oracle, &toolchain, &PassthroughFormatter)
                .expect("repairer");

        let outcome = repairer.run_job("s1", "add tests", "calc_test.go").expect("job");

        assert!(outcome.passed());
        assert_eq!(oracle.calls(), 1);
        assert_eq!(toolchain.count("test"), 2);
        let tests = module.read("calc_test.go").expect("read tests");
        assert!(!tests.contains("strings"));
        assert!(tests.contains("\"testing\""));
        assert!(tests.contains("func TestAdd(t *testing.T)"));
    }
}
