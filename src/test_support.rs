//! Step recorder shared by unit and integration tests.
//!
//! Every test opens a [`TestReport`] with [`test_report!`](crate::test_report)
//! and records setup, actions and assertions on it. When the test fails the
//! recorded steps are printed to stderr so the failure reads as a narrative.
//! Setting `LOCAL_ROUTER_TEST_REPORT_DIR` additionally writes one text file
//! per test into that directory.

use std::fmt::{Debug, Display};
use std::path::PathBuf;
use std::sync::Mutex;

/// Open a [`TestReport`] named after the calling test function.
/// Works for both sync and async test functions.
#[macro_export]
macro_rules! test_report {
    ($title:expr) => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        let name = &name[..name.len() - 3];
        let name = name.strip_suffix("::{{closure}}").unwrap_or(name);
        $crate::test_support::TestReport::new(name, $title, file!(), line!())
    }};
}

enum Step {
    Setup(String),
    Action(String),
    Pass(String),
    Fail(String),
}

impl Step {
    fn line(&self) -> String {
        match self {
            Step::Setup(msg) => format!("  setup   {}", msg),
            Step::Action(msg) => format!("  action  {}", msg),
            Step::Pass(msg) => format!("  ok      {}", msg),
            Step::Fail(msg) => format!("  FAILED  {}", msg),
        }
    }
}

pub struct TestReport {
    full_path: String,
    title: String,
    source: String,
    steps: Mutex<Vec<Step>>,
    report_dir: Option<PathBuf>,
}

impl TestReport {
    pub fn new(full_path: &str, title: &str, source_file: &str, source_line: u32) -> Self {
        Self {
            full_path: full_path.to_string(),
            title: title.to_string(),
            source: format!("{}:{}", source_file, source_line),
            steps: Mutex::new(Vec::new()),
            report_dir: std::env::var_os("LOCAL_ROUTER_TEST_REPORT_DIR").map(PathBuf::from),
        }
    }

    fn push(&self, step: Step) {
        self.steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(step);
    }

    fn shorten(value: String) -> String {
        const MAX: usize = 400;
        if value.len() <= MAX {
            return value;
        }
        let mut cut = MAX;
        while !value.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}… ({} bytes)", &value[..cut], value.len())
    }

    pub fn setup(&self, msg: impl Display) {
        self.push(Step::Setup(msg.to_string()));
    }

    pub fn action(&self, msg: impl Display) {
        self.push(Step::Action(msg.to_string()));
    }

    pub fn assert_eq<A, E>(&self, label: &str, actual: &A, expected: &E)
    where
        A: PartialEq<E> + Debug,
        E: Debug,
    {
        let pass = actual == expected;
        let msg = format!(
            "{}: `{}` == `{}`",
            label,
            Self::shorten(format!("{:?}", actual)),
            Self::shorten(format!("{:?}", expected))
        );
        self.push(if pass { Step::Pass(msg) } else { Step::Fail(msg) });
        assert_eq!(actual, expected, "{}", label);
    }

    pub fn assert_ne<A, E>(&self, label: &str, actual: &A, other: &E)
    where
        A: PartialEq<E> + Debug,
        E: Debug,
    {
        let pass = actual != other;
        let msg = format!(
            "{}: `{}` != `{}`",
            label,
            Self::shorten(format!("{:?}", actual)),
            Self::shorten(format!("{:?}", other))
        );
        self.push(if pass { Step::Pass(msg) } else { Step::Fail(msg) });
        assert_ne!(actual, other, "{}", label);
    }

    pub fn assert_contains(&self, label: &str, haystack: &str, needle: &str) {
        let pass = haystack.contains(needle);
        let msg = format!(
            "{}: `{}` contains `{}`",
            label,
            Self::shorten(haystack.to_string()),
            needle
        );
        self.push(if pass { Step::Pass(msg) } else { Step::Fail(msg) });
        assert!(pass, "{}: {:?} does not contain {:?}", label, haystack, needle);
    }

    pub fn assert_true(&self, label: &str, value: bool) {
        let msg = format!("{}: `{}`", label, value);
        self.push(if value { Step::Pass(msg) } else { Step::Fail(msg) });
        assert!(value, "{}", label);
    }

    fn render(&self, result: &str) -> String {
        let steps = self.steps.lock().unwrap_or_else(|e| e.into_inner());
        let mut lines = vec![
            format!("TEST   {}", self.full_path),
            format!("TITLE  {}", self.title),
            format!("SOURCE {}", self.source),
        ];
        lines.extend(steps.iter().map(Step::line));
        lines.push(format!("RESULT {}", result));
        lines.push(String::new());
        lines.join("\n")
    }
}

impl Drop for TestReport {
    fn drop(&mut self) {
        let failed = std::thread::panicking();
        let result = if failed { "fail" } else { "pass" };
        let text = self.render(result);

        if failed {
            eprintln!("{}", text);
        }

        if let Some(dir) = &self.report_dir {
            let file = dir.join(format!("{}.txt", self.full_path.replace("::", "__")));
            let _ = std::fs::create_dir_all(dir);
            let _ = std::fs::write(file, text);
        }
    }
}
