//! End-to-end build pipeline tests against an on-disk build context.

use std::sync::Arc;

use archlens::provision::digest::tree_digest;
use archlens::provision::{BuildContext, BuildManifest, BuildPipeline, BuildPlan, ImageConfig};
use archlens::runtime::{ProvisionOptions, ToolchainMode};
use archlens::ArchlensError;
use archlens_shared::layout::ImageLayout;
use archlens_test_utils::{BuildContextFixture, FakeExecutor, FakeInstaller};

fn plan_for(fixture: &BuildContextFixture) -> BuildPlan {
    let manifest = BuildManifest::from_path(&fixture.manifest()).unwrap();
    BuildPlan::from_manifest(&manifest, &BuildContext::new(fixture.root())).unwrap()
}

fn execute_options() -> ProvisionOptions {
    ProvisionOptions {
        toolchain_mode: ToolchainMode::Execute,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_build_produces_complete_image() {
    let fixture = BuildContextFixture::new();
    let output = fixture.output("orchestrator");
    let executor = Arc::new(FakeExecutor::new());
    let installer = Arc::new(FakeInstaller::new());

    let image = BuildPipeline::with_backends(
        plan_for(&fixture),
        &output,
        execute_options(),
        executor.clone(),
        installer.clone(),
    )
    .run()
    .await
    .unwrap();

    let layout = ImageLayout::new(&output);
    assert!(layout.is_complete());
    assert_eq!(installer.install_count(), 1);

    // Exec-form entrypoint, no shell wrapper
    assert_eq!(image.config.entrypoint, vec!["python", "src/orchestrator.py"]);
    assert_eq!(image.config.working_dir, "/app");

    let names: Vec<&str> = image.config.requirements.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["requests", "pyyaml", "networkx"]);
    assert!(layout.rootfs_dir().join("opt/archlens/deps/requests").is_dir());

    // Source tree arrives unaltered
    assert_eq!(
        tree_digest(&fixture.root().join("src")).unwrap(),
        tree_digest(&layout.rootfs_dir().join("app/src")).unwrap()
    );

    let saved = ImageConfig::load(&layout.config_path()).unwrap();
    assert_eq!(saved.source_digest, image.config.source_digest);
    assert_eq!(saved.env_var("PYTHONUNBUFFERED"), Some("1"));

    // Package manager calls target the image rootfs, not the host
    let first = &executor.commands()[0];
    assert!(first.contains("apt-get -o RootDir="), "{first}");
    assert!(first.contains(" install -y"), "{first}");
    assert!(first.contains("orchestrator.partial/rootfs"), "{first}");
}

#[tokio::test]
async fn test_unresolvable_requirement_fails_without_image() {
    let fixture = BuildContextFixture::new();
    let output = fixture.output("orchestrator");

    let err = BuildPipeline::with_backends(
        plan_for(&fixture),
        &output,
        execute_options(),
        Arc::new(FakeExecutor::new()),
        Arc::new(FakeInstaller::new().missing("networkx")),
    )
    .run()
    .await
    .unwrap_err();

    assert!(matches!(err, ArchlensError::Stage { stage: "dependencies", .. }), "{err}");
    assert!(err.to_string().contains("networkx"));
    assert!(!output.exists());
    assert!(!ImageLayout::staging_for(&output).root().exists());
}

#[tokio::test]
async fn test_failed_toolchain_install_names_stage() {
    let fixture = BuildContextFixture::new();
    let output = fixture.output("orchestrator");
    let installer = Arc::new(FakeInstaller::new());

    let err = BuildPipeline::with_backends(
        plan_for(&fixture),
        &output,
        execute_options(),
        Arc::new(FakeExecutor::new().failing_on("apt-get")),
        installer.clone(),
    )
    .run()
    .await
    .unwrap_err();

    assert!(err.to_string().contains("stage 'toolchain' failed"), "{err}");
    assert_eq!(installer.install_count(), 0);
    assert!(!output.exists());
}

#[tokio::test]
async fn test_purge_keeps_runtime_required_packages() {
    let fixture = BuildContextFixture::new();
    let output = fixture.output("orchestrator");
    let executor = Arc::new(FakeExecutor::new());
    let options = ProvisionOptions {
        purge_build_tools: true,
        ..execute_options()
    };

    let image = BuildPipeline::with_backends(
        plan_for(&fixture),
        &output,
        options,
        executor.clone(),
        Arc::new(FakeInstaller::new().requiring("gcc")),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(image.config.retained_packages, vec!["gcc"]);
    assert_eq!(image.config.build_packages, vec!["gcc"]);

    let purge = executor
        .commands()
        .into_iter()
        .find(|c| c.contains(" purge "))
        .expect("purge command ran");
    let words: Vec<&str> = purge.split_whitespace().collect();
    assert_eq!(words[1], "-o", "{purge}");
    assert!(words[2].starts_with("RootDir="), "{purge}");
    assert_eq!(words.last(), Some(&"git"), "{purge}");
    assert!(!words.contains(&"gcc"));
}

#[tokio::test]
async fn test_runtime_required_git_is_retained_and_not_purged() {
    let fixture = BuildContextFixture::new();
    let output = fixture.output("orchestrator");
    let executor = Arc::new(FakeExecutor::new());
    let options = ProvisionOptions {
        purge_build_tools: true,
        ..execute_options()
    };

    let image = BuildPipeline::with_backends(
        plan_for(&fixture),
        &output,
        options,
        executor.clone(),
        Arc::new(FakeInstaller::new().requiring("git")),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(image.config.retained_packages, vec!["git"]);
    assert_eq!(image.config.build_packages, vec!["git"]);

    let purge = executor
        .commands()
        .into_iter()
        .find(|c| c.contains(" purge "))
        .expect("purge command ran");
    let words: Vec<&str> = purge.split_whitespace().collect();
    assert!(words.contains(&"gcc"), "{purge}");
    assert!(!words.contains(&"git"), "{purge}");
}
