//! Integration tests for Scriptisto

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use serial_test::serial;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    const SETUP: &str = r#"echo s >> "$SCRIPTISTO_SOURCE_DIR/setup.log""#;
    const BUILD: &str =
        r#"cp tool.sh tool && chmod +x tool && echo b >> "$SCRIPTISTO_SOURCE_DIR/build.log""#;

    /// A script in its own directory plus an isolated cache root and config
    struct Sandbox {
        temp: TempDir,
    }

    impl Sandbox {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            std::fs::create_dir(temp.path().join("scripts")).unwrap();
            Self { temp }
        }

        fn scripts(&self) -> PathBuf {
            self.temp.path().join("scripts")
        }

        fn cache_root(&self) -> PathBuf {
            self.temp.path().join("cache")
        }

        fn script(&self) -> PathBuf {
            self.scripts().join("tool.sh")
        }

        fn write_raw(&self, contents: &str) {
            std::fs::write(self.script(), contents).unwrap();
        }

        fn write(&self, build_cmd: &str, body: &str) {
            self.write_raw(&format!(
                "#!/usr/bin/env scriptisto\n\
                 # scriptisto-begin\n\
                 # script_src: tool.sh\n\
                 # build_once_cmd: '{}'\n\
                 # build_cmd: '{}'\n\
                 # target_bin: ./tool\n\
                 # replace_shebang_with: '#!/bin/sh'\n\
                 # scriptisto-end\n\
                 {body}\n",
                SETUP.replace('\'', "''"),
                build_cmd.replace('\'', "''"),
            ));
        }

        fn cmd(&self) -> Command {
            let mut cmd = cargo_bin_cmd!("scriptisto");
            cmd.env("CACHE_ROOT", self.cache_root())
                .env("SCRIPTISTO_CONFIG", self.temp.path().join("config.toml"))
                .env_remove("RUST_LOG")
                .current_dir(self.scripts());
            cmd
        }

        fn configure(&self, toml: &str) {
            std::fs::write(self.temp.path().join("config.toml"), toml).unwrap();
        }

        fn count(&self, log: &str) -> usize {
            std::fs::read_to_string(self.scripts().join(log))
                .map(|s| s.lines().count())
                .unwrap_or(0)
        }
    }

    fn cache_is_empty(root: &Path) -> bool {
        walk_files(&root.join("bin")).is_empty()
    }

    fn walk_files(dir: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    found.extend(walk_files(&path));
                } else {
                    found.push(path);
                }
            }
        }
        found
    }

    #[test]
    fn help_displays() {
        cargo_bin_cmd!("scriptisto")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("shebang interpreter"));
    }

    #[test]
    fn version_displays() {
        cargo_bin_cmd!("scriptisto")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("scriptisto"));
    }

    #[test]
    fn runs_script_with_args_and_exit_code() {
        let sb = Sandbox::new();
        sb.write(BUILD, "echo \"args: $*\"\nexit 7");

        sb.cmd()
            .args(["./tool.sh", "one", "--two"])
            .assert()
            .code(7)
            .stdout(predicate::str::contains("args: one --two"));
        assert_eq!(sb.count("setup.log"), 1);
        assert_eq!(sb.count("build.log"), 1);
    }

    #[test]
    fn run_subcommand_matches_shebang_form() {
        let sb = Sandbox::new();
        sb.write(BUILD, "echo \"args: $*\"");

        sb.cmd()
            .args(["run", "./tool.sh", "--", "-x", "y"])
            .assert()
            .success()
            .stdout(predicate::str::contains("args: -x y"));
    }

    #[test]
    fn second_run_uses_cache() {
        let sb = Sandbox::new();
        sb.write(BUILD, "echo hi");

        sb.cmd().arg("./tool.sh").assert().success();
        sb.cmd()
            .arg("./tool.sh")
            .assert()
            .success()
            .stdout(predicate::str::contains("hi"));
        assert_eq!(sb.count("setup.log"), 1);
        assert_eq!(sb.count("build.log"), 1);
    }

    #[test]
    fn edit_triggers_rebuild() {
        let sb = Sandbox::new();
        sb.write(BUILD, "echo first");
        sb.cmd()
            .arg("./tool.sh")
            .assert()
            .success()
            .stdout(predicate::str::contains("first"));

        sb.write(BUILD, "echo second");
        sb.cmd()
            .arg("./tool.sh")
            .assert()
            .success()
            .stdout(predicate::str::contains("second"));
        assert_eq!(sb.count("build.log"), 2);
        assert_eq!(sb.count("setup.log"), 2);
    }

    #[test]
    fn missing_manifest_exits_1_without_cache() {
        let sb = Sandbox::new();
        sb.write_raw("#!/bin/sh\necho no manifest\n");

        sb.cmd()
            .arg("./tool.sh")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("scriptisto-begin"));
        assert!(cache_is_empty(&sb.cache_root()));
    }

    #[test]
    fn missing_target_bin_exits_1() {
        let sb = Sandbox::new();
        sb.write_raw(
            "#!/usr/bin/env scriptisto\n\
             # scriptisto-begin\n\
             # script_src: tool.sh\n\
             # build_cmd: make\n\
             # scriptisto-end\n",
        );

        sb.cmd()
            .arg("./tool.sh")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("target_bin"));
    }

    #[test]
    fn missing_script_exits_1() {
        let sb = Sandbox::new();
        sb.cmd()
            .arg("./nope.sh")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Script not found"));
    }

    #[test]
    fn failed_build_exits_2_and_retry_reruns_setup() {
        let sb = Sandbox::new();
        sb.write("echo compile error; exit 1", "echo hi");

        sb.cmd()
            .arg("./tool.sh")
            .assert()
            .code(2)
            .stderr(predicate::str::contains("Build command failed"))
            .stderr(predicate::str::contains("compile error"));
        assert_eq!(sb.count("setup.log"), 1);

        sb.cmd().arg("./tool.sh").assert().code(2);
        assert_eq!(sb.count("setup.log"), 2);
    }

    #[test]
    fn build_command_streams_output() {
        let sb = Sandbox::new();
        sb.write(&format!("echo building now && {BUILD}"), "echo hi");

        sb.cmd()
            .args(["build", "./tool.sh"])
            .assert()
            .success()
            .stderr(predicate::str::contains("building now"));

        sb.cmd()
            .args(["build", "./tool.sh"])
            .assert()
            .success()
            .stderr(predicate::str::contains("Up to date"));
        assert_eq!(sb.count("build.log"), 1);
    }

    #[test]
    fn build_force_reruns_setup() {
        let sb = Sandbox::new();
        sb.write(BUILD, "echo hi");

        sb.cmd().args(["build", "./tool.sh"]).assert().success();
        sb.cmd()
            .args(["build", "./tool.sh", "--force"])
            .assert()
            .success();
        assert_eq!(sb.count("setup.log"), 2);
        assert_eq!(sb.count("build.log"), 2);

        sb.cmd()
            .args(["build", "./tool.sh", "--build-mode", "source"])
            .assert()
            .success();
        assert_eq!(sb.count("setup.log"), 2);
        assert_eq!(sb.count("build.log"), 3);
    }

    #[test]
    #[serial]
    fn concurrent_runs_build_once() {
        let sb = Sandbox::new();
        sb.write(&format!("sleep 1 && {BUILD}"), "echo hi");

        std::thread::scope(|scope| {
            let runs: Vec<_> = (0..3)
                .map(|_| {
                    scope.spawn(|| {
                        sb.cmd()
                            .arg("./tool.sh")
                            .assert()
                            .success()
                            .stdout(predicate::str::contains("hi"));
                    })
                })
                .collect();
            for run in runs {
                run.join().unwrap();
            }
        });
        assert_eq!(sb.count("build.log"), 1);
        assert_eq!(sb.count("setup.log"), 1);
    }

    #[test]
    fn cache_info_get_and_clean() {
        let sb = Sandbox::new();
        sb.write(BUILD, "echo hi");
        sb.cmd().arg("./tool.sh").assert().success();

        sb.cmd()
            .args(["cache", "info", "./tool.sh"])
            .assert()
            .success()
            .stdout(predicate::str::contains("cache_path"))
            .stdout(predicate::str::contains("fresh"));

        let out = sb
            .cmd()
            .args(["cache", "get", "cache_path", "./tool.sh"])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        let cache_path = PathBuf::from(String::from_utf8(out).unwrap().trim());
        assert!(cache_path.starts_with(sb.cache_root()));
        assert!(cache_path.join("tool").exists());

        sb.cmd()
            .args(["cache", "clean", "./tool.sh"])
            .assert()
            .success();
        assert!(!cache_path.exists());

        sb.cmd().arg("./tool.sh").assert().success();
        assert_eq!(sb.count("setup.log"), 2);
    }

    #[test]
    fn cache_get_unknown_item() {
        let sb = Sandbox::new();
        sb.write(BUILD, "echo hi");

        sb.cmd()
            .args(["cache", "get", "colour", "./tool.sh"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Available items"))
            .stderr(predicate::str::contains("cache_path"));
    }

    #[test]
    fn completions_bash() {
        cargo_bin_cmd!("scriptisto")
            .args(["completions", "bash"])
            .assert()
            .success()
            .stdout(predicate::str::contains("scriptisto"));
    }

    #[test]
    fn config_path_and_set() {
        let sb = Sandbox::new();
        sb.cmd()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));

        sb.cmd()
            .args(["config", "set", "build.timeout_secs", "30"])
            .assert()
            .success();
        sb.cmd()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("timeout_secs = 30"));

        sb.cmd()
            .args(["config", "set", "build.colour", "red"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown config key"));
    }

    #[test]
    fn usage_error_exits_1() {
        let sb = Sandbox::new();
        sb.cmd()
            .args(["build"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Usage"));
        sb.cmd()
            .args(["cache", "info", "./tool.sh", "--no-such-flag"])
            .assert()
            .code(1);
    }

    #[test]
    fn shown_build_output_is_not_repeated() {
        let sb = Sandbox::new();
        sb.configure("[build]\nshow_output = true\n");
        // The printed line differs from the command text in the error message
        sb.write("printf 'E%s\\n' 42; exit 1", "echo hi");

        sb.cmd()
            .arg("./tool.sh")
            .assert()
            .code(2)
            .stderr(predicate::function(|err: &str| err.matches("E42").count() == 1))
            .stderr(predicate::str::contains("Output:").not());
    }

    #[cfg(unix)]
    #[test]
    fn forwards_non_utf8_args() {
        use std::ffi::OsString;
        use std::os::unix::ffi::OsStringExt;

        let sb = Sandbox::new();
        sb.write(BUILD, "printf '%s' \"$1\" > arg.out");
        let raw = b"caf\xe9.txt".to_vec();

        sb.cmd()
            .arg("./tool.sh")
            .arg(OsString::from_vec(raw.clone()))
            .assert()
            .success();
        assert_eq!(std::fs::read(sb.scripts().join("arg.out")).unwrap(), raw);
    }
}
