//! Command construction for each framework.
//!
//! Commands are always argument vectors. User-supplied identifiers, tags and
//! paths become discrete elements and never pass through a shell.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::CoreError;
use crate::framework::{ExitCodePolicy, Framework, FrameworkSettings};
use crate::ids::RunId;
use crate::request::ValidRequest;

/// A fully resolved process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {:?}", arg)?;
        }
        Ok(())
    }
}

/// Everything needed to execute and interpret one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPlan {
    pub framework: Framework,
    pub command: CommandSpec,
    pub policy: ExitCodePolicy,
    /// Directory holding this run's artifacts, if the framework writes any.
    /// Never shared with another run.
    pub output_dir: Option<PathBuf>,
    /// Report produced by the runner, if any.
    pub report_path: Option<PathBuf>,
}

/// Name of a run's artifact directory under the framework's output directory.
fn run_dir_name(run: RunId) -> String {
    format!("run-{}", run)
}

/// Map a validated request onto its framework's command line.
///
/// Artifacts of `run` land in `<artifact_root>/<output_subdir>/run-<id>`.
/// Robot keeps the fixed `--outputdir` and names its output, log and report
/// files inside the run directory; screenshots follow the log file.
pub fn build_command(
    request: &ValidRequest,
    settings: &FrameworkSettings,
    artifact_root: &Path,
    run: RunId,
) -> Result<CommandPlan, CoreError> {
    let (program, leading) = settings.launcher.split_first().ok_or_else(|| {
        CoreError::InvalidInput(format!("empty launcher for {}", request.framework))
    })?;

    let framework_dir = settings
        .output_subdir
        .as_ref()
        .map(|sub| artifact_root.join(sub));
    let run_dir = run_dir_name(run);
    let output_dir = framework_dir.as_ref().map(|dir| dir.join(&run_dir));
    let report_path = match (&output_dir, &settings.report_file) {
        (Some(dir), Some(file)) => Some(dir.join(file)),
        _ => None,
    };
    let test_path = request
        .test_path
        .as_deref()
        .or(settings.default_path.as_deref());

    let mut command = CommandSpec::new(program.clone()).args(leading.iter().cloned());
    if let Some(dir) = &settings.working_dir {
        command = command.current_dir(dir.clone());
    }

    let id = request.test_identifier.as_str();
    let tags = &request.tags;

    command = match request.framework {
        Framework::Robot => {
            let mut cmd = command.args(["--test", id]);
            if let Some(dir) = &framework_dir {
                let report = settings.report_file.as_deref().unwrap_or("report.html");
                cmd = cmd
                    .arg("--outputdir")
                    .arg(dir.display().to_string())
                    .arg("--output")
                    .arg(format!("{}/output.xml", run_dir))
                    .arg("--log")
                    .arg(format!("{}/log.html", run_dir))
                    .arg("--report")
                    .arg(format!("{}/{}", run_dir, report));
            }
            for tag in tags {
                cmd = cmd.args(["--include", tag.as_str()]);
            }
            match test_path {
                Some(path) => cmd.arg(path),
                None => cmd,
            }
        }
        Framework::Playwright => {
            let mut cmd = match test_path {
                Some(path) => command.arg(path),
                None => command,
            };
            cmd = cmd.args(["--grep", id]);
            if !tags.is_empty() {
                cmd = cmd.arg("--grep").arg(format!("@({})", tags.join("|")));
            }
            if let Some(dir) = &output_dir {
                cmd = cmd.arg("--output").arg(dir.display().to_string());
            }
            cmd
        }
        Framework::Pytest => {
            let mut cmd = match test_path {
                Some(path) => command.arg(path),
                None => command,
            };
            cmd = cmd.args(["-k", id, "-v", "--tb=short"]);
            if !tags.is_empty() {
                cmd = cmd.arg("-m").arg(tags.join(" or "));
            }
            cmd
        }
    };

    Ok(CommandPlan {
        framework: request.framework,
        command,
        policy: settings.exit_codes,
        output_dir,
        report_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::TestRunRequest;

    fn plan(request: TestRunRequest) -> CommandPlan {
        plan_for_run(request, RunId::new(7))
    }

    fn plan_for_run(request: TestRunRequest, run: RunId) -> CommandPlan {
        let settings = FrameworkSettings::for_framework(request.framework);
        let request = request.validate().unwrap();
        build_command(&request, &settings, Path::new("evidence"), run).unwrap()
    }

    #[test]
    fn test_robot_command() {
        let plan = plan(
            TestRunRequest::new(Framework::Robot, "smoke")
                .with_tag("critical")
                .with_tag("auth"),
        );
        assert_eq!(
            plan.command.argv(),
            vec![
                "robot",
                "--test",
                "smoke",
                "--outputdir",
                "evidence/robot",
                "--output",
                "run-7/output.xml",
                "--log",
                "run-7/log.html",
                "--report",
                "run-7/report.html",
                "--include",
                "auth",
                "--include",
                "critical",
                "tests/",
            ]
        );
        assert_eq!(plan.policy, ExitCodePolicy::robot());
        assert_eq!(plan.output_dir, Some(PathBuf::from("evidence/robot/run-7")));
        assert_eq!(
            plan.report_path,
            Some(PathBuf::from("evidence/robot/run-7/report.html"))
        );
    }

    #[test]
    fn test_playwright_command() {
        let plan = plan(TestRunRequest::new(Framework::Playwright, "login-flow"));
        assert_eq!(
            plan.command.argv(),
            vec![
                "npx",
                "playwright",
                "test",
                "--grep",
                "login-flow",
                "--output",
                "evidence/playwright/run-7",
            ]
        );

        let tagged = self::plan(
            TestRunRequest::new(Framework::Playwright, "checkout")
                .with_tag("slow")
                .with_tag("cart")
                .with_path("e2e/shop.spec.ts"),
        );
        assert_eq!(
            tagged.command.args,
            vec![
                "playwright",
                "test",
                "e2e/shop.spec.ts",
                "--grep",
                "checkout",
                "--grep",
                "@(cart|slow)",
                "--output",
                "evidence/playwright/run-7",
            ]
        );
        assert!(tagged.report_path.is_none());
    }

    #[test]
    fn test_runs_never_share_artifact_dirs() {
        for framework in [Framework::Robot, Framework::Playwright] {
            let first = plan_for_run(TestRunRequest::new(framework, "t"), RunId::new(1));
            let second = plan_for_run(TestRunRequest::new(framework, "t"), RunId::new(2));

            assert!(first.output_dir.is_some());
            assert_ne!(first.output_dir, second.output_dir);
            assert_ne!(first.command.args, second.command.args);
        }
    }

    #[test]
    fn test_pytest_command() {
        let plan = plan(
            TestRunRequest::new(Framework::Pytest, "test_login")
                .with_tag("smoke")
                .with_tag("db"),
        );
        assert_eq!(
            plan.command.argv(),
            vec!["pytest", "-k", "test_login", "-v", "--tb=short", "-m", "db or smoke"]
        );
        assert!(plan.output_dir.is_none());
    }

    #[test]
    fn test_shell_metacharacters_stay_literal() {
        let hostile = "x; rm -rf / && echo $(whoami) | tee `id`";
        for framework in Framework::ALL {
            let plan = plan(TestRunRequest::new(framework, hostile).with_tag("a;b"));
            assert_ne!(plan.command.program, "sh");
            assert_eq!(plan.command.args.iter().filter(|a| *a == hostile).count(), 1);
            assert!(plan.command.args.iter().any(|a| a.contains("a;b")));
            assert!(plan.command.args.iter().all(|a| a == hostile || !a.contains("rm -rf")));
        }
    }

    #[test]
    fn test_custom_launcher_and_working_dir() {
        let settings = FrameworkSettings::pytest().with_launcher(["python3", "-m", "pytest"]);
        let settings = FrameworkSettings {
            working_dir: Some(PathBuf::from("/srv/tests")),
            ..settings
        };
        let request = TestRunRequest::new(Framework::Pytest, "t").validate().unwrap();
        let plan = build_command(&request, &settings, Path::new("out"), RunId::new(1)).unwrap();
        assert_eq!(plan.command.program, "python3");
        assert_eq!(&plan.command.args[..2], &["-m", "pytest"]);
        assert_eq!(plan.command.working_dir, Some(PathBuf::from("/srv/tests")));
    }

    #[test]
    fn test_empty_launcher_rejected() {
        let settings = FrameworkSettings::pytest().with_launcher(Vec::<String>::new());
        let request = TestRunRequest::new(Framework::Pytest, "t").validate().unwrap();
        let err = build_command(&request, &settings, Path::new("out"), RunId::new(1));
        assert!(matches!(err, Err(CoreError::InvalidInput(_))));
    }
}
