use crate::il::Assignment;
use crate::state::{StateId, TerminationReason};
use crate::Error;
use serde::{Deserialize, Serialize};

/// Concrete inputs which drive the program down one explored path.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TestCase {
    /// The id of the state which explored the path.
    pub path: StateId,
    pub reason: TerminationReason,
    /// A value for every symbolic input of the path.
    pub inputs: Assignment,
    /// False when the path was cut short, when the solver could not produce
    /// inputs, or when the path relied on unknown solver verdicts.
    pub complete: bool,
}

impl TestCase {
    pub fn is_error(&self) -> bool {
        self.reason.is_error()
    }
}

/// Receives test cases as paths terminate.
pub trait TestCaseSink {
    fn emit(&mut self, test_case: &TestCase) -> Result<(), Error>;
}

/// Keeps every test case in memory.
#[derive(Clone, Debug, Default)]
pub struct TestCaseCollector {
    test_cases: Vec<TestCase>,
}

impl TestCaseCollector {
    pub fn new() -> TestCaseCollector {
        TestCaseCollector::default()
    }

    pub fn test_cases(&self) -> &[TestCase] {
        &self.test_cases
    }

    pub fn into_test_cases(self) -> Vec<TestCase> {
        self.test_cases
    }

    pub fn len(&self) -> usize {
        self.test_cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.test_cases.is_empty()
    }

    /// Test cases of paths which ended in an error.
    pub fn errors(&self) -> impl Iterator<Item = &TestCase> {
        self.test_cases.iter().filter(|test_case| test_case.is_error())
    }
}

impl TestCaseSink for TestCaseCollector {
    fn emit(&mut self, test_case: &TestCase) -> Result<(), Error> {
        self.test_cases.push(test_case.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::const_;
    use crate::PathError;

    #[test]
    fn test_cases_serialize() {
        let mut inputs = Assignment::new();
        inputs.set_scalar("x", const_(10, 32));
        inputs.set_array("buf", vec![1, 2]);
        let test_case = TestCase {
            path: 3,
            reason: TerminationReason::Error(PathError::OutOfBounds),
            inputs,
            complete: true,
        };

        let json = serde_json::to_string(&test_case).unwrap();
        let parsed: TestCase = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, test_case);

        let mut collector = TestCaseCollector::new();
        collector.emit(&test_case).unwrap();
        assert_eq!(collector.errors().count(), 1);
    }
}
