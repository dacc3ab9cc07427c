//! Pipeline steps and the plans selected by file classification.

use std::fmt;

use serde::Serialize;

/// One stage of the repair pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    Start,
    StartError,
    Optimize,
    OptimizeError,
    AddTests,
    AddTestsError,
}

impl StepId {
    pub fn as_str(self) -> &'static str {
        match self {
            StepId::Start => "start",
            StepId::StartError => "start_error",
            StepId::Optimize => "optimize",
            StepId::OptimizeError => "optimize_error",
            StepId::AddTests => "add_tests",
            StepId::AddTestsError => "add_tests_error",
        }
    }

    pub fn is_error(self) -> bool {
        matches!(
            self,
            StepId::StartError | StepId::OptimizeError | StepId::AddTestsError
        )
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prompt template that opens a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptTemplate {
    Start,
    Optimize,
    AddTests,
}

/// Which file a step writes by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepTarget {
    Source,
    Test,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepDefinition {
    pub id: StepId,
    /// State entered once a build or test of this step fails.
    pub on_error: StepId,
    pub template: PromptTemplate,
    pub target: StepTarget,
}

/// Classification of the file a job works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileClass {
    Source,
    Test,
    Other,
}

/// Classify a file name by its suffix.
pub fn classify(file_name: &str) -> FileClass {
    if file_name.ends_with("_test.go") {
        FileClass::Test
    } else if file_name.ends_with(".go") {
        FileClass::Source
    } else {
        FileClass::Other
    }
}

/// The fixed step sequence for a file class. Other files get an empty plan.
pub fn plan_for(class: FileClass) -> Vec<StepDefinition> {
    match class {
        FileClass::Source => vec![
            StepDefinition {
                id: StepId::Start,
                on_error: StepId::StartError,
                template: PromptTemplate::Start,
                target: StepTarget::Source,
            },
            StepDefinition {
                id: StepId::Optimize,
                on_error: StepId::OptimizeError,
                template: PromptTemplate::Optimize,
                target: StepTarget::Source,
            },
            StepDefinition {
                id: StepId::AddTests,
                on_error: StepId::AddTestsError,
                template: PromptTemplate::AddTests,
                target: StepTarget::Test,
            },
        ],
        FileClass::Test => vec![StepDefinition {
            id: StepId::Start,
            on_error: StepId::AddTestsError,
            template: PromptTemplate::Start,
            target: StepTarget::Test,
        }],
        FileClass::Other => Vec::new(),
    }
}

/// `calc.go` -> `calc_test.go`. Test files map to themselves.
pub fn test_file_for(file_name: &str) -> String {
    if file_name.ends_with("_test.go") {
        return file_name.to_string();
    }
    match file_name.strip_suffix(".go") {
        Some(stem) => format!("{stem}_test.go"),
        None => format!("{file_name}_test.go"),
    }
}

/// `calc_test.go` -> `calc.go`. Other names map to themselves.
pub fn source_file_for(file_name: &str) -> String {
    match file_name.strip_suffix("_test.go") {
        Some(stem) => format!("{stem}.go"),
        None => file_name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verifies plain source files run start, optimize, then add-tests.
    #[test]
    fn source_plan_has_three_steps_with_error_routes() {
        let plan = plan_for(classify("calc.go"));
        let routes: Vec<(StepId, StepId)> = plan.iter().map(|s| (s.id, s.on_error)).collect();
        assert_eq!(
            routes,
            vec![
                (StepId::Start, StepId::StartError),
                (StepId::Optimize, StepId::OptimizeError),
                (StepId::AddTests, StepId::AddTestsError),
            ]
        );
        assert_eq!(plan[2].target, StepTarget::Test);
    }

    /// Verifies test files route their single step to the add-tests error state.
    #[test]
    fn test_plan_routes_to_add_tests_error() {
        let plan = plan_for(classify("calc_test.go"));
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].on_error, StepId::AddTestsError);
        assert_eq!(plan[0].target, StepTarget::Test);
    }

    /// Verifies non-Go files get no plan.
    #[test]
    fn other_files_have_empty_plan() {
        assert_eq!(classify("README.md"), FileClass::Other);
        assert!(plan_for(FileClass::Other).is_empty());
    }

    /// Verifies source and test file names map onto each other.
    #[test]
    fn maps_between_source_and_test_names() {
        assert_eq!(test_file_for("pkg/calc.go"), "pkg/calc_test.go");
        assert_eq!(test_file_for("calc_test.go"), "calc_test.go");
        assert_eq!(source_file_for("calc_test.go"), "calc.go");
        assert_eq!(source_file_for("calc.go"), "calc.go");
    }
}
