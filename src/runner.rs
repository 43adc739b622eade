//! Runs the selected tests through `go test`.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;
use tracing::info;

use crate::error::Error;
use crate::exec::CommandFactory;
use crate::pipeline::{PipelineContext, Task};
use crate::strategy::Strategy;

/// Task asking the strategy what to run and invoking the test tool.
pub struct GoTestRunner {
    strategy: Box<dyn Strategy>,
    cmd: Arc<dyn CommandFactory>,
    /// Raw arguments handed to the test binary after `-args`.
    args: String,
}

impl GoTestRunner {
    pub fn new(strategy: Box<dyn Strategy>, cmd: Arc<dyn CommandFactory>, args: String) -> Self {
        Self {
            strategy,
            cmd,
            args,
        }
    }

    fn base_params() -> Vec<String> {
        vec![
            "test".into(),
            "-v".into(),
            "-vet".into(),
            "off".into(),
            "-failfast".into(),
            "-cpu".into(),
            num_cpus::get().to_string(),
        ]
    }

    /// Joins tests into the `-run` anchor form: `T1$|T2$/(s_1|s2)`.
    pub fn join_test_and_subtest(tests: &[String], sub_tests: &[String]) -> String {
        let mut out = tests.join("$|");
        if !out.is_empty() {
            out.push('$');
        }
        if !sub_tests.is_empty() {
            let subs: Vec<String> = sub_tests.iter().map(|s| s.replace(' ', "_")).collect();
            out.push_str(&format!("/({})", subs.join("|")));
        }
        out
    }
}

impl Task for GoTestRunner {
    fn id(&self) -> &str {
        "GoTestRunner"
    }

    fn run(&self, ctx: &PipelineContext) -> Result<String> {
        let (run_all, tests, sub_tests) = match self.strategy.tests_to_run(ctx) {
            Ok(result) => result,
            Err(e) if Error::is(&e, &Error::BuildFailed) => {
                return Ok("Build Failed".to_string());
            }
            Err(e) if Error::is(&e, &Error::TaskCanceled) => return Err(e),
            Err(e) => return Err(e.context("strategy error")),
        };
        if tests.is_empty() && sub_tests.is_empty() {
            return Ok("No test found to run".to_string());
        }

        // qualified name -> (package path, bare test names)
        let mut pkg_tests: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for tname in &tests {
            let (pkg, name) = match tname.rfind('.') {
                Some(id) => (&tname[..id], &tname[id + 1..]),
                None => ("", tname.as_str()),
            };
            let pkg = if pkg.is_empty() { "." } else { pkg };
            pkg_tests.entry(pkg.to_string()).or_default().push(name.to_string());
        }

        log_str_list("Tests to run", &tests);
        if !sub_tests.is_empty() {
            log_str_list("Subtests to run", &sub_tests);
        }

        let names: Vec<String> = pkg_tests.values().flatten().cloned().collect();
        let formatted = Self::join_test_and_subtest(&names, &sub_tests);

        let success = if run_all || !self.strategy.coverage_enabled() {
            self.run_batched(ctx, run_all, &pkg_tests, &formatted)?
        } else {
            self.run_per_test(ctx, &pkg_tests)?
        };

        let msg = if success {
            info!("{}", "Tests PASS".green());
            format!("Tests PASS: {formatted}")
        } else {
            info!("{}", "Tests FAIL".red());
            format!("Tests FAIL: {formatted}")
        };
        Ok(msg)
    }
}

impl GoTestRunner {
    /// One invocation carrying every package and the whole `-run` anchor.
    fn run_batched(
        &self,
        ctx: &PipelineContext,
        run_all: bool,
        pkg_tests: &BTreeMap<String, Vec<String>>,
        formatted: &str,
    ) -> Result<bool> {
        let mut params = Self::base_params();
        if run_all && self.strategy.coverage_enabled() {
            params.push("-coverprofile".into());
            params.push("coverage_profile".into());
        }
        params.push("-run".into());
        params.push(formatted.to_string());
        params.extend(pkg_tests.keys().cloned());
        if !self.args.is_empty() {
            params.push("-args".into());
            params.push(self.args.clone());
        }
        let mut cmd = self.cmd.command(&ctx.cancel, "go", &params);
        info!(">> {}", cmd.args().join(" "));
        cmd.run()?;
        Ok(cmd.success())
    }

    /// One invocation per test so each one writes its own cover profile;
    /// stops at the first failure.
    fn run_per_test(
        &self,
        ctx: &PipelineContext,
        pkg_tests: &BTreeMap<String, Vec<String>>,
    ) -> Result<bool> {
        let mut success = true;
        'outer: for (pkg, tests) in pkg_tests {
            for tname in tests {
                let mut params = Self::base_params();
                params.push("-coverprofile".into());
                params.push(format!(
                    "{}/{}.{}",
                    crate::strategy::coverage::PROFILE_DIR,
                    pkg.replace('/', "_"),
                    tname
                ));
                params.push("-run".into());
                params.push(tname.clone());
                params.push(pkg.clone());
                if !self.args.is_empty() {
                    params.push("-args".into());
                    params.push(self.args.clone());
                }
                let mut cmd = self.cmd.command(&ctx.cancel, "go", &params);
                info!(">> {}", cmd.args().join(" "));
                cmd.run()?;
                success = cmd.success();
                if !success {
                    break 'outer;
                }
            }
        }
        Ok(success)
    }
}

fn log_str_list(title: &str, items: &[String]) {
    let mut sorted = items.to_vec();
    sorted.sort();
    info!("=============");
    info!("{title}");
    for item in &sorted {
        info!("-> {item}");
    }
    info!("=============");
}
