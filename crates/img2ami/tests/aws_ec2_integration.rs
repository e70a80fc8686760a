//! EC2 integration tests - actually call AWS APIs
//!
//! These tests are marked `#[ignore]` and only run with:
//! ```text
//! AWS_PROFILE=your_profile cargo test --test aws_ec2_integration -- --ignored
//! ```

mod aws_test_helpers;

use aws_test_helpers::*;
use img2ami::aws::{AwsContext, CleanupConfig, Ec2Client, TagBasedCleanup};
use img2ami::orchestrator::ImageRegistrar;
use img2ami::wait::WaitConfig;
use tokio_util::sync::CancellationToken;

/// Looking up a name nobody registers finds nothing
#[tokio::test]
#[ignore]
async fn test_find_missing_image() {
    let region = get_test_region();
    let ctx = AwsContext::new(&region, None).await;
    let client = Ec2Client::from_context(&ctx);

    let name = format!("img2ami-{}-does-not-exist", test_run_id());
    let found = client
        .find_image_by_name(&name)
        .await
        .expect("AWS credentials required - set AWS_PROFILE or AWS_ACCESS_KEY_ID");
    assert!(found.is_none(), "unexpected image {found:?}");
}

/// The preflight lookup through the registrar parses real responses
#[tokio::test]
#[ignore]
async fn test_registrar_lookup() {
    let region = get_test_region();
    let ctx = AwsContext::new(&region, None).await;
    let client = Ec2Client::from_context(&ctx);
    let registrar = ImageRegistrar::new(
        &client,
        WaitConfig::from_secs(0, 1, 1),
        CancellationToken::new(),
    );

    let name = format!("img2ami-{}-preflight", test_run_id());
    let found = registrar
        .find_by_name(&name)
        .await
        .expect("lookup should succeed");
    assert!(found.is_none());
}

/// A dry-run cleanup scan touches nothing
#[tokio::test]
#[ignore]
async fn test_cleanup_dry_run_scan() {
    let region = get_test_region();
    let ctx = AwsContext::new(&region, None).await;
    let cleanup = TagBasedCleanup::from_context(&ctx);

    let config = CleanupConfig {
        run_id: Some(test_run_id()),
        ..Default::default()
    };
    let report = cleanup.cleanup(&config).await.expect("scan should succeed");
    assert_eq!(report.deleted, 0);
    assert_eq!(report.failed, 0);
}
