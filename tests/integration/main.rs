//! Integration tests for cairn

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    const HELLO_WORLD: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    fn cairn() -> Command {
        let mut cmd = cargo_bin_cmd!("cairn");
        cmd.env_remove("CAIRN_CONFIG");
        cmd
    }

    /// A project dir with python files and a config pointing at a private store
    struct Fixture {
        temp: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let project = temp.path().join("project");
            std::fs::create_dir_all(project.join("pkg")).unwrap();
            std::fs::write(project.join("app.py"), "print('app')\n").unwrap();
            std::fs::write(project.join("pkg").join("util.py"), "X = 1\n").unwrap();
            std::fs::write(project.join("notes.txt"), "not python\n").unwrap();

            let config = format!(
                "[remote]\nstore_dir = '{}'\nclient_id = 'cl-it'\n",
                temp.path().join("store").display()
            );
            std::fs::write(temp.path().join("config.toml"), config).unwrap();
            Self { temp }
        }

        fn project(&self) -> PathBuf {
            self.temp.path().join("project")
        }

        fn store(&self) -> PathBuf {
            self.temp.path().join("store")
        }

        fn cmd(&self) -> Command {
            let mut cmd = cairn();
            cmd.current_dir(self.project())
                .arg("--config")
                .arg(self.temp.path().join("config.toml"));
            cmd
        }
    }

    fn count_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .map(|entries| entries.filter_map(Result::ok).count())
            .unwrap_or(0)
    }

    #[test]
    fn help_displays() {
        cairn()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("content-addressed sync"));
    }

    #[test]
    fn version_displays() {
        cairn()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("cairn"));
    }

    #[test]
    fn config_path_honors_flag() {
        let fixture = Fixture::new();
        fixture
            .cmd()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let fixture = Fixture::new();
        fixture
            .cmd()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[join]").and(predicate::str::contains("cl-it")));
    }

    #[test]
    fn config_set_rejects_unknown_key() {
        let fixture = Fixture::new();
        fixture
            .cmd()
            .args(["config", "set", "vm.name", "x"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown config key"));
    }

    #[test]
    fn invalid_config_fails_with_hint() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[join]\nrequest_timeout_secs = 60\n").unwrap();

        cairn()
            .arg("--config")
            .arg(&path)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration").and(predicate::str::contains("Hint:")));
    }

    #[test]
    fn hash_prints_sorted_digests() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("b.py"), "hello world").unwrap();
        std::fs::write(temp.path().join("a.py"), "hello world").unwrap();
        std::fs::write(temp.path().join("c.txt"), "skipped").unwrap();

        let expected = format!("{HELLO_WORLD}  a.py\n{HELLO_WORLD}  b.py\n");
        cairn()
            .arg("hash")
            .arg(temp.path())
            .args(["--ext", "py"])
            .assert()
            .success()
            .stdout(predicate::eq(expected));
    }

    #[test]
    fn hash_missing_dir_fails() {
        let temp = TempDir::new().unwrap();
        cairn()
            .arg("hash")
            .arg(temp.path().join("missing"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to walk"));
    }

    #[test]
    fn sync_uploads_only_once() {
        let fixture = Fixture::new();

        fixture
            .cmd()
            .args(["sync", ".", "/root", "--ext", "py"])
            .assert()
            .success()
            .stdout(predicate::str::starts_with("mo-"))
            .stderr(predicate::str::contains("uploaded: 2"));
        assert_eq!(count_files(&fixture.store().join("blobs")), 2);

        // Second run: a fresh mount, but the store already has the content
        fixture
            .cmd()
            .args(["sync", ".", "/root", "--ext", "py"])
            .assert()
            .success()
            .stderr(predicate::str::contains("files: 2").and(predicate::str::contains("uploaded: 0")));
        assert_eq!(count_files(&fixture.store().join("mounts")), 2);
    }

    #[test]
    fn build_without_join_prints_image_id() {
        let fixture = Fixture::new();
        fixture
            .cmd()
            .args(["build", "--no-join"])
            .assert()
            .success()
            .stdout(predicate::str::starts_with("im-"));
        assert_eq!(count_files(&fixture.store().join("images")), 1);
    }

    #[test]
    fn build_and_join_reports_flattened_layers() {
        let fixture = Fixture::new();
        fixture
            .cmd()
            .args(["build", "--python", "3.10.4", "-p", "requests", "--run", "echo hi"])
            .assert()
            .success()
            .stdout(
                predicate::str::contains("python-3.10.4-slim-buster-base")
                    .and(predicate::str::contains("python-3.10.4-slim-buster-builder"))
                    .and(predicate::str::contains("RUN pip wheel requests -w /tmp/wheels"))
                    .and(predicate::str::contains("RUN echo hi"))
                    .and(predicate::str::contains("\"files\": 2")),
            );
        assert_eq!(count_files(&fixture.store().join("layers")), 4);
    }

    #[test]
    fn build_uses_manifest_in_working_dir() {
        let fixture = Fixture::new();
        std::fs::write(
            fixture.project().join("cairn.toml"),
            "[image]\ncommands = ['apt-get update']\n\n[[mount]]\nlocal = 'pkg'\nremote = '/opt/pkg'\n",
        )
        .unwrap();

        fixture
            .cmd()
            .arg("build")
            .assert()
            .success()
            .stdout(
                predicate::str::contains("RUN apt-get update").and(predicate::str::contains("\"files\": 1")),
            );
    }

    #[test]
    fn build_rejects_invalid_manifest() {
        let fixture = Fixture::new();
        let manifest = fixture.project().join("broken.toml");
        std::fs::write(&manifest, "[image]\nunknown = 1\n").unwrap();

        fixture
            .cmd()
            .arg("build")
            .arg("--manifest")
            .arg(&manifest)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid image manifest"));
    }

    #[test]
    fn unsupported_backend_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[remote]\nbackend = 'grpc'\n").unwrap();

        cairn()
            .current_dir(temp.path())
            .arg("--config")
            .arg(&path)
            .args(["sync", "."])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Remote backend not supported"));
    }
}
