use anyhow::{Context, bail};
use std::path::{Path, PathBuf};
use std::process::Command;

static EXPECTED_STDOUT_FILE: &str = "expected-stdout";
static EXPECTED_TRACES_FILE: &str = "expected-traces.json";
static ACTUAL_TRACES_PATH: &str = "target/golden-traces.json";

/// When set, missing or outdated expectations are overwritten with the actual output
static RECORD_ENV_VAR: &str = "GOLDEN_RECORD";

struct TestCase {
    dir: PathBuf,
    name: String,
    args: String,
    expected_stdout: Option<String>,
    expected_traces: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let record = std::env::var_os(RECORD_ENV_VAR).is_some();
    let mut test_dirs: Vec<_> = std::fs::read_dir("golden-tests/tests")
        .context("golden tests root directory not found")?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    test_dirs.sort();

    let mut test_cases = Vec::new();
    for path in test_dirs {
        if !path.is_dir() {
            println!(
                "skipping path `{}` because it's not a directory",
                path.display()
            );
            continue;
        }

        let args_path = path.join("args");
        let args = std::fs::read_to_string(&args_path)
            .with_context(|| format!("no `args` file found at `{}`", args_path.display()))?;

        test_cases.push(TestCase {
            name: path.display().to_string(),
            expected_stdout: read_if_exists(&path.join(EXPECTED_STDOUT_FILE))?,
            expected_traces: read_if_exists(&path.join(EXPECTED_TRACES_FILE))?,
            dir: path,
            args,
        })
    }

    let mut errored = false;
    for test_case in test_cases {
        let name = test_case.name.clone();
        if let Err(e) = run_flow_workbench(test_case, record) {
            println!("Error running golden test `{name}`");
            match e {
                TestError::Internal(e) => println!("{e:?}"),
                TestError::Missing(path) => println!(
                    "Missing `{}` (rerun with {RECORD_ENV_VAR}=1 to record it)",
                    path.display()
                ),
                TestError::Compare(e) => {
                    if let Some(diff) = e.traces_diff {
                        println!("Expected traces differ from actual traces:\n{diff}\n");
                    }

                    if let Some(diff) = e.stdout_diff {
                        println!("Expected stdout differs from actual stdout:\n{diff}");
                    }
                }
            }
            errored = true;
        } else {
            println!("{name}: ✅");
        }
    }

    if errored {
        bail!("one or more golden tests failed");
    }

    Ok(())
}

fn read_if_exists(path: &Path) -> anyhow::Result<Option<String>> {
    if !path.is_file() {
        return Ok(None);
    }

    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read `{}`", path.display()))
        .map(Some)
}

enum TestError {
    Internal(anyhow::Error),
    Missing(PathBuf),
    Compare(CompareError),
}

struct CompareError {
    stdout_diff: Option<String>,
    traces_diff: Option<String>,
}

fn run_flow_workbench(test_case: TestCase, record: bool) -> Result<(), TestError> {
    let workbench_args = test_case.args.split_whitespace();
    let command = Command::new("cargo")
        .arg("run")
        .arg("--release")
        .arg("--bin")
        .arg("flow-workbench")
        .arg("--")
        .args(workbench_args)
        .arg("--output-json")
        .arg(ACTUAL_TRACES_PATH)
        .output()
        .context("flow-workbench process crashed")
        .map_err(TestError::Internal)?;

    if !command.status.success() {
        return Err(TestError::Internal(anyhow::anyhow!(
            "flow-workbench exited with {}:\n{}",
            command.status,
            String::from_utf8_lossy(&command.stderr)
        )));
    }

    let stdout = String::from_utf8_lossy(&command.stdout);
    let traces = std::fs::read_to_string(ACTUAL_TRACES_PATH)
        .with_context(|| format!("failed to read {ACTUAL_TRACES_PATH}"))
        .map_err(TestError::Internal)?;

    let stdout_diff = compare_or_record(
        test_case.expected_stdout.as_deref(),
        &stdout,
        &test_case.dir.join(EXPECTED_STDOUT_FILE),
        record,
    )?;
    let traces_diff = compare_or_record(
        test_case.expected_traces.as_deref(),
        &traces,
        &test_case.dir.join(EXPECTED_TRACES_FILE),
        record,
    )?;

    if stdout_diff.is_some() || traces_diff.is_some() {
        Err(TestError::Compare(CompareError {
            stdout_diff,
            traces_diff,
        }))
    } else {
        Ok(())
    }
}

/// Returns a diff when the output doesn't match the expectation
///
/// In record mode the expectation is overwritten instead, and the comparison always succeeds.
fn compare_or_record(
    expected: Option<&str>,
    actual: &str,
    path: &Path,
    record: bool,
) -> Result<Option<String>, TestError> {
    if record && expected != Some(actual) {
        std::fs::write(path, actual.as_bytes())
            .with_context(|| format!("failed to persist `{}`", path.display()))
            .map_err(TestError::Internal)?;
        return Ok(None);
    }

    match expected {
        Some(expected) if expected != actual => Ok(Some(diff::diff_to_string(expected, actual))),
        Some(_) => Ok(None),
        None => Err(TestError::Missing(path.to_path_buf())),
    }
}

mod diff {
    use console::{Style, style};
    use similar::{ChangeTag, TextDiff};
    use std::fmt::{self, Write};

    struct Line(Option<usize>);

    impl fmt::Display for Line {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            match self.0 {
                None => write!(f, "    "),
                Some(idx) => write!(f, "{:<4}", idx + 1),
            }
        }
    }

    pub fn diff_to_string(old: &str, new: &str) -> String {
        let mut output = String::new();
        let diff = TextDiff::from_lines(old, new);

        for (idx, group) in diff.grouped_ops(3).iter().enumerate() {
            if idx > 0 {
                _ = writeln!(output, "{:-^1$}", "-", 80);
            }
            for op in group {
                for change in diff.iter_inline_changes(op) {
                    let (sign, s) = match change.tag() {
                        ChangeTag::Delete => ("-", Style::new().red()),
                        ChangeTag::Insert => ("+", Style::new().green()),
                        ChangeTag::Equal => (" ", Style::new().dim()),
                    };
                    _ = write!(
                        output,
                        "{}{} |{}",
                        style(Line(change.old_index())).dim(),
                        style(Line(change.new_index())).dim(),
                        s.apply_to(sign).bold(),
                    );
                    for (emphasized, value) in change.iter_strings_lossy() {
                        if emphasized {
                            _ = write!(output, "{}", s.apply_to(value).underlined().on_black());
                        } else {
                            _ = write!(output, "{}", s.apply_to(value));
                        }
                    }
                    if change.missing_newline() {
                        _ = writeln!(output);
                    }
                }
            }
        }

        output
    }
}
