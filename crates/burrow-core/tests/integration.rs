use burrow_core::{ActivationState, CoreError, Engine, MissingReason};
use burrow_runtime::{
    ActivationMode, Activator, MockProvider, PackageProvider, RegistryProvider, ScriptFormat,
    ScriptTarget, DESCRIPTOR_FILE,
};
use burrow_schema::{
    parse_manifest_str, ContentId, EnvValue, LockError, LockFile, Manifest, ManifestError,
    ResolvedArtifact,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

fn mock_engine(store: &Path, provider: MockProvider) -> Engine {
    Engine::new(store.join("store"), Arc::new(provider)).unwrap()
}

fn c_ast_manifest() -> Manifest {
    parse_manifest_str(
        r#"
name = "c-ast"
build_inputs = ["rustc", "cargo"]
link_inputs = ["openssl"]

[env]
RUST_BACKTRACE = "1"
"#,
    )
    .unwrap()
}

fn base_env() -> BTreeMap<String, String> {
    let mut base = BTreeMap::new();
    base.insert("PATH".to_owned(), "/usr/bin:/bin".to_owned());
    base.insert("HOME".to_owned(), "/home/dev".to_owned());
    base
}

#[test]
fn c_ast_resolves_to_three_artifacts_and_override_wins() {
    let dir = tempfile::tempdir().unwrap();
    let mut env = BTreeMap::new();
    env.insert("RUST_BACKTRACE".to_owned(), EnvValue::literal("full"));
    env.insert("PATH".to_owned(), EnvValue::paths(["/opt/rustc/bin"]));
    let rustc = ResolvedArtifact::new("rustc", "1.75.0", "/opt/rustc", env);
    let engine = mock_engine(dir.path(), MockProvider::new().with_artifact(rustc));

    let mut session = engine.session(c_ast_manifest());
    let resolution = session.resolve().unwrap();
    assert_eq!(resolution.artifacts().len(), 3);

    let composed = session.compose(base_env()).unwrap();
    assert_eq!(composed.get("RUST_BACKTRACE"), Some("1"));
    assert_eq!(
        composed.get("PATH"),
        Some("/mock/store/openssl-0.0.0-mock/bin:/mock/store/cargo-0.0.0-mock/bin:/opt/rustc/bin:/usr/bin:/bin")
    );
    assert_eq!(composed.get("HOME"), Some("/home/dev"));
}

#[test]
fn cold_and_warm_resolution_yield_identical_content_ids() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::new());
    let engine = Engine::new(
        dir.path().join("store"),
        Arc::clone(&provider) as Arc<dyn PackageProvider>,
    )
    .unwrap();

    let mut cold = engine.session(c_ast_manifest());
    let cold_ids = cold.resolve().unwrap().locked_inputs();
    let lookups_after_cold = provider.lookups();

    let mut warm = engine.session(c_ast_manifest());
    let warm_ids = warm.resolve().unwrap().locked_inputs();
    assert_eq!(cold_ids, warm_ids);
    assert_eq!(provider.lookups(), lookups_after_cold);

    assert_eq!(
        cold.lock_file().unwrap().env_id,
        warm.lock_file().unwrap().env_id
    );
}

#[test]
fn swapping_link_inputs_reorders_path() {
    let dir = tempfile::tempdir().unwrap();
    let engine = mock_engine(dir.path(), MockProvider::new());

    let path_for = |links: &str| {
        let m = parse_manifest_str(&format!("name = \"swap\"\nlink_inputs = [{links}]")).unwrap();
        let mut session = engine.session(m);
        session
            .prepare(BTreeMap::new())
            .unwrap()
            .get("PATH")
            .map(str::to_owned)
            .unwrap()
    };

    assert_eq!(
        path_for("\"zlib\", \"openssl\""),
        "/mock/store/openssl-0.0.0-mock/bin:/mock/store/zlib-0.0.0-mock/bin"
    );
    assert_eq!(
        path_for("\"openssl\", \"zlib\""),
        "/mock/store/zlib-0.0.0-mock/bin:/mock/store/openssl-0.0.0-mock/bin"
    );
}

#[test]
fn swapping_build_inputs_keeps_link_scalar() {
    let dir = tempfile::tempdir().unwrap();
    let scalar = |name: &str, value: &str| {
        let mut env = BTreeMap::new();
        env.insert("CC".to_owned(), EnvValue::literal(value));
        ResolvedArtifact::new(name, "1.0", format!("/opt/{name}"), env)
    };
    let engine = mock_engine(
        dir.path(),
        MockProvider::new()
            .with_artifact(scalar("gcc", "gcc"))
            .with_artifact(scalar("clang", "clang"))
            .with_artifact(scalar("openssl", "openssl-cc")),
    );

    for build in ["\"gcc\", \"clang\"", "\"clang\", \"gcc\""] {
        let m = parse_manifest_str(&format!(
            "name = \"cc\"\nbuild_inputs = [{build}]\nlink_inputs = [\"openssl\"]"
        ))
        .unwrap();
        let mut session = engine.session(m);
        let composed = session.prepare(BTreeMap::new()).unwrap();
        assert_eq!(composed.get("CC"), Some("openssl-cc"));
    }
}

#[test]
fn identical_shared_input_is_not_a_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let engine = mock_engine(dir.path(), MockProvider::new());
    let m = parse_manifest_str(
        "name = \"shared\"\nbuild_inputs = [\"openssl@3.0\"]\nlink_inputs = [\"openssl@3.0\"]",
    )
    .unwrap();
    let mut session = engine.session(m);
    assert_eq!(session.resolve().unwrap().artifacts().len(), 1);
}

#[test]
fn differing_shared_input_is_a_conflict() {
    let err = parse_manifest_str(
        "name = \"shared\"\nbuild_inputs = [\"openssl@3.0\"]\nlink_inputs = [\"openssl@1.1\"]",
    )
    .unwrap_err();
    let conflict = match err {
        ManifestError::Conflict(c) => c,
        other => panic!("expected a conflict, got {other}"),
    };
    assert_eq!(conflict.name, "openssl");
    assert_eq!(conflict.build.to_string(), "openssl@3.0");
    assert_eq!(conflict.link.to_string(), "openssl@1.1");
}

#[test]
fn unknown_input_fails_session_and_blocks_activation() {
    let dir = tempfile::tempdir().unwrap();
    let engine = mock_engine(dir.path(), MockProvider::new().with_missing("nonesuch"));
    let m = parse_manifest_str("name = \"bad\"\nbuild_inputs = [\"rustc\", \"nonesuch\"]").unwrap();
    let mut session = engine.session(m);

    let err = session.resolve().unwrap_err();
    let resolution = match err {
        CoreError::Resolution(r) => r,
        other => panic!("expected a resolution error, got {other}"),
    };
    assert_eq!(resolution.missing.len(), 1);
    assert_eq!(resolution.missing[0].input.name(), "nonesuch");
    assert_eq!(resolution.missing[0].reason, MissingReason::NotFound);
    assert_eq!(session.state(), ActivationState::Failed);

    let activator = Activator::new(ActivationMode::Script {
        format: ScriptFormat::Posix,
        target: ScriptTarget::Memory,
        deactivate: false,
    });
    assert!(session.prepare(BTreeMap::new()).is_err());
    assert!(session.activate(&activator).is_err());
}

#[test]
fn teardown_twice_matches_teardown_once() {
    let dir = tempfile::tempdir().unwrap();
    let engine = mock_engine(dir.path(), MockProvider::new());
    let script = dir.path().join("activate.sh");
    let activator = Activator::new(ActivationMode::Script {
        format: ScriptFormat::Posix,
        target: ScriptTarget::File(script.clone()),
        deactivate: false,
    });

    let mut session = engine.session(c_ast_manifest());
    session.prepare(base_env()).unwrap();
    let mut handle = session.activate(&activator).unwrap();
    assert!(script.exists());

    let listing = || {
        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        names.sort();
        names
    };
    handle.teardown();
    let after_once = listing();
    handle.teardown();
    assert_eq!(listing(), after_once);
    assert!(!script.exists());

    session.deactivate(handle).unwrap();
    assert_eq!(session.state(), ActivationState::Deactivated);
}

#[test]
fn spawned_command_sees_composed_environment() {
    let dir = tempfile::tempdir().unwrap();
    let engine = mock_engine(dir.path(), MockProvider::new());
    let mut session = engine.session(c_ast_manifest());
    session.prepare(base_env()).unwrap();

    let activator = Activator::new(ActivationMode::Spawn {
        program: "sh".to_owned(),
        args: vec![
            "-c".to_owned(),
            "test \"$RUST_BACKTRACE\" = 1 && test \"$HOME\" = /home/dev".to_owned(),
        ],
        cwd: None,
    });
    let mut handle = session.activate(&activator).unwrap();
    assert!(handle.wait().unwrap().success());
    session.deactivate(handle).unwrap();
}

#[test]
fn lock_roundtrip_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let engine = mock_engine(dir.path(), MockProvider::new());
    let lock_path = dir.path().join("burrow.lock");

    let mut session = engine.session(c_ast_manifest());
    session.resolve().unwrap();
    session.lock_file().unwrap().write_to_file(&lock_path).unwrap();

    let lock = LockFile::read_from_file(&lock_path).unwrap();
    let mut locked = engine.session(c_ast_manifest());
    locked.resolve_locked(&lock).unwrap();
    assert_eq!(locked.state(), ActivationState::Resolved);

    let changed = parse_manifest_str(
        "name = \"c-ast\"\nbuild_inputs = [\"rustc\"]\nlink_inputs = [\"openssl\"]\n[env]\nRUST_BACKTRACE = \"1\"",
    )
    .unwrap();
    let mut drifted = engine.session(changed);
    assert!(matches!(
        drifted.resolve_locked(&lock),
        Err(CoreError::Lock(_))
    ));
}

#[test]
fn hand_edited_lock_with_bad_content_id_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let engine = mock_engine(dir.path(), MockProvider::new());

    let mut session = engine.session(c_ast_manifest());
    session.resolve().unwrap();
    let mut inputs = session.lock_file().unwrap().inputs;
    inputs[0].content_id = ContentId::new("abcdefghijkéé");
    let lock = LockFile::from_resolved(&c_ast_manifest(), inputs);

    let mut locked = engine.session(c_ast_manifest());
    assert!(matches!(
        locked.resolve_locked(&lock),
        Err(CoreError::Lock(LockError::MalformedContentId { .. }))
    ));
    assert_eq!(locked.state(), ActivationState::Failed);
}

#[test]
fn registry_provider_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let registry = dir.path().join("registry");
    for (pkg, version) in [("rustc", "1.75.0"), ("rustc", "1.76.0"), ("openssl", "3.0.13")] {
        let install = registry.join(format!("{pkg}-{version}"));
        std::fs::create_dir_all(install.join("bin")).unwrap();
        std::fs::write(
            install.join(DESCRIPTOR_FILE),
            format!("name = \"{pkg}\"\nversion = \"{version}\"\n"),
        )
        .unwrap();
    }
    let engine = Engine::new(
        dir.path().join("store"),
        Arc::new(RegistryProvider::new(&registry)),
    )
    .unwrap();

    let m = parse_manifest_str(
        "name = \"reg\"\nbuild_inputs = [\"rustc@~1.75\"]\nlink_inputs = [\"openssl@>=3\"]",
    )
    .unwrap();
    let mut session = engine.session(m);
    let resolution = session.resolve().unwrap();
    assert_eq!(resolution.get("rustc").unwrap().artifact.version, "1.75.0");

    let composed = session.compose(BTreeMap::new()).unwrap();
    let expected = format!(
        "{}:{}",
        registry.join("openssl-3.0.13/bin").display(),
        registry.join("rustc-1.75.0/bin").display()
    );
    assert_eq!(composed.get("PATH"), Some(expected.as_str()));
}
