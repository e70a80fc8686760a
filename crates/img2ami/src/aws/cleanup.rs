//! Tag-based orphan cleanup
//!
//! Finds worker instances, detached working volumes and unregistered
//! snapshots left behind by runs that crashed, failed after snapshotting or
//! lost the race between a creation call and the cleanup guard, and removes
//! them. Discovery relies only on the `img2ami:*` tags.

use crate::aws::context::AwsContext;
use crate::aws::ec2::Ec2Client;
use crate::aws::error::ignore_not_found;
use anyhow::{Context, Result};
use aws_sdk_ec2::types::{Filter, Tag};
use chrono::{DateTime, Duration, Utc};
use img2ami_common::ResourceKind;
use img2ami_common::defaults::DEFAULT_ORPHAN_MIN_AGE_HOURS;
use img2ami_common::tags::{TAG_CREATED_AT, TAG_IMAGE_NAME, TAG_RUN_ID, TAG_TOOL, TAG_TOOL_VALUE, parse_created_at};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Cleanup configuration
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// Minimum age before a resource is considered orphaned
    pub min_age: Duration,
    /// Only clean up resources from this run
    pub run_id: Option<String>,
    /// Only report what would be removed
    pub dry_run: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            min_age: Duration::hours(DEFAULT_ORPHAN_MIN_AGE_HOURS as i64),
            run_id: None,
            dry_run: true,
        }
    }
}

/// Report of cleanup operations
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub total_found: usize,
    pub instances: usize,
    pub volumes: usize,
    pub snapshots: usize,
    pub deleted: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// A tagged resource found by scanning
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredResource {
    pub kind: ResourceKind,
    pub id: String,
    pub run_id: String,
    pub image_name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Tag-based resource cleanup for one region
pub struct TagBasedCleanup {
    ec2: Ec2Client,
    region: String,
}

impl TagBasedCleanup {
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            ec2: Ec2Client::from_context(ctx),
            region: ctx.region().to_string(),
        }
    }

    /// Scan and optionally remove orphaned resources
    pub async fn cleanup(&self, config: &CleanupConfig) -> Result<CleanupReport> {
        info!(
            min_age_hours = config.min_age.num_hours(),
            dry_run = config.dry_run,
            run_id = ?config.run_id,
            region = %self.region,
            "Scanning for orphaned resources"
        );

        let mut found = self.scan_instances(config.run_id.as_deref()).await?;
        found.extend(self.scan_volumes(config.run_id.as_deref()).await?);
        found.extend(self.scan_snapshots(config.run_id.as_deref()).await?);

        let resources = select_orphans(found, config.min_age, Utc::now());
        let mut report = CleanupReport {
            total_found: resources.len(),
            ..Default::default()
        };

        if resources.is_empty() {
            info!("No orphaned resources found");
            return Ok(report);
        }

        info!(count = resources.len(), "Found orphaned resources");

        for resource in &resources {
            match resource.kind {
                ResourceKind::Instance => report.instances += 1,
                ResourceKind::Volume => report.volumes += 1,
                ResourceKind::Snapshot => report.snapshots += 1,
                _ => {}
            }

            if config.dry_run {
                info!(
                    kind = %resource.kind,
                    id = %resource.id,
                    run_id = %resource.run_id,
                    image_name = ?resource.image_name,
                    "[DRY RUN] Would remove"
                );
                report.skipped += 1;
                continue;
            }

            let result = match resource.kind {
                ResourceKind::Instance => self.ec2.terminate_instance(&resource.id).await,
                ResourceKind::Volume => self.ec2.delete_volume(&resource.id).await,
                ResourceKind::Snapshot => self.ec2.delete_snapshot(&resource.id).await,
                _ => {
                    report.skipped += 1;
                    continue;
                }
            };

            match ignore_not_found(result) {
                Ok(()) => {
                    info!(kind = %resource.kind, id = %resource.id, "Removed");
                    report.deleted += 1;
                }
                Err(e) => {
                    warn!(kind = %resource.kind, id = %resource.id, error = ?e, "Cleanup failed");
                    report.failed += 1;
                }
            }
        }

        if !config.dry_run && report.instances > 0 {
            info!(
                "Working volumes of terminated workers become available after termination; \
                 run cleanup-orphans again to remove them"
            );
        }

        Ok(report)
    }

    async fn scan_instances(&self, run_id: Option<&str>) -> Result<Vec<DiscoveredResource>> {
        let mut filters = tool_filters(run_id);
        filters.push(
            Filter::builder()
                .name("instance-state-name")
                .values("pending")
                .values("running")
                .values("stopping")
                .values("stopped")
                .build(),
        );

        let mut pages = self
            .ec2
            .client
            .describe_instances()
            .set_filters(Some(filters))
            .into_paginator()
            .send();

        let mut resources = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.context("Failed to scan tagged instances")?;
            resources.extend(
                page.reservations()
                    .iter()
                    .flat_map(|r| r.instances())
                    .filter_map(|i| discovered(ResourceKind::Instance, i.instance_id()?, i.tags())),
            );
        }

        debug!(count = resources.len(), "Found tagged instances");
        Ok(resources)
    }

    /// Only detached volumes; attached ones go away with their instance
    async fn scan_volumes(&self, run_id: Option<&str>) -> Result<Vec<DiscoveredResource>> {
        let mut filters = tool_filters(run_id);
        filters.push(Filter::builder().name("status").values("available").build());

        let mut pages = self
            .ec2
            .client
            .describe_volumes()
            .set_filters(Some(filters))
            .into_paginator()
            .send();

        let mut resources = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.context("Failed to scan tagged volumes")?;
            resources.extend(
                page.volumes()
                    .iter()
                    .filter_map(|v| discovered(ResourceKind::Volume, v.volume_id()?, v.tags())),
            );
        }

        debug!(count = resources.len(), "Found tagged volumes");
        Ok(resources)
    }

    /// Finished snapshots that no image owned by this account is built on
    async fn scan_snapshots(&self, run_id: Option<&str>) -> Result<Vec<DiscoveredResource>> {
        let mut filters = tool_filters(run_id);
        filters.push(
            Filter::builder()
                .name("status")
                .values("completed")
                .values("error")
                .build(),
        );

        let mut pages = self
            .ec2
            .client
            .describe_snapshots()
            .owner_ids("self")
            .set_filters(Some(filters))
            .into_paginator()
            .send();

        let mut found = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.context("Failed to scan tagged snapshots")?;
            found.extend(
                page.snapshots()
                    .iter()
                    .filter_map(|s| discovered(ResourceKind::Snapshot, s.snapshot_id()?, s.tags())),
            );
        }
        if found.is_empty() {
            return Ok(found);
        }

        let candidates: Vec<String> = found.iter().map(|r| r.id.clone()).collect();
        let referenced = self.snapshots_backing_images(&candidates).await?;
        let resources = unregistered_snapshots(found, &referenced);

        debug!(count = resources.len(), "Found tagged snapshots backing no image");
        Ok(resources)
    }

    /// Which of `snapshot_ids` back an image owned by this account
    async fn snapshots_backing_images(&self, snapshot_ids: &[String]) -> Result<HashSet<String>> {
        let mut referenced = HashSet::new();
        let mut next_token = None;

        loop {
            let response = self
                .ec2
                .client
                .describe_images()
                .owners("self")
                .filters(
                    Filter::builder()
                        .name("block-device-mapping.snapshot-id")
                        .set_values(Some(snapshot_ids.to_vec()))
                        .build(),
                )
                .set_next_token(next_token)
                .send()
                .await
                .context("Failed to list images built on tagged snapshots")?;

            referenced.extend(
                response
                    .images()
                    .iter()
                    .flat_map(|image| image.block_device_mappings())
                    .filter_map(|mapping| mapping.ebs()?.snapshot_id())
                    .map(str::to_string),
            );

            match response.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        Ok(referenced)
    }
}

/// Drop snapshots that a registered image still depends on
fn unregistered_snapshots(
    found: Vec<DiscoveredResource>,
    referenced: &HashSet<String>,
) -> Vec<DiscoveredResource> {
    found
        .into_iter()
        .filter(|r| {
            let in_use = referenced.contains(&r.id);
            if in_use {
                debug!(snapshot_id = %r.id, "Snapshot backs an image, keeping it");
            }
            !in_use
        })
        .collect()
}

fn tool_filters(run_id: Option<&str>) -> Vec<Filter> {
    let mut filters = vec![
        Filter::builder()
            .name(format!("tag:{TAG_TOOL}"))
            .values(TAG_TOOL_VALUE)
            .build(),
    ];
    if let Some(run_id) = run_id {
        filters.push(
            Filter::builder()
                .name(format!("tag:{TAG_RUN_ID}"))
                .values(run_id)
                .build(),
        );
    }
    filters
}

fn tag_map(tags: &[Tag]) -> HashMap<&str, &str> {
    tags.iter()
        .filter_map(|t| Some((t.key()?, t.value()?)))
        .collect()
}

/// Build a discovered resource from its tags; resources without a run id are not ours
fn discovered(kind: ResourceKind, id: &str, tags: &[Tag]) -> Option<DiscoveredResource> {
    let tags = tag_map(tags);
    if tags.get(TAG_TOOL) != Some(&TAG_TOOL_VALUE) {
        return None;
    }

    Some(DiscoveredResource {
        kind,
        id: id.to_string(),
        run_id: tags.get(TAG_RUN_ID)?.to_string(),
        image_name: tags.get(TAG_IMAGE_NAME).map(|s| s.to_string()),
        created_at: tags.get(TAG_CREATED_AT).and_then(|s| parse_created_at(s)),
    })
}

/// Keep resources older than `min_age`, instances first.
///
/// Resources without a parseable created-at tag are kept out, since their
/// age cannot be established.
pub fn select_orphans(
    resources: Vec<DiscoveredResource>,
    min_age: Duration,
    now: DateTime<Utc>,
) -> Vec<DiscoveredResource> {
    let mut orphans: Vec<_> = resources
        .into_iter()
        .filter(|r| match r.created_at {
            Some(created_at) => now - created_at >= min_age,
            None => {
                warn!(kind = %r.kind, id = %r.id, "Skipping resource without created-at tag");
                false
            }
        })
        .collect();
    orphans.sort_by_key(|r| r.kind.cleanup_priority());
    orphans
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use img2ami_common::tags::format_created_at;

    fn tag(key: &str, value: &str) -> Tag {
        Tag::builder().key(key).value(value).build()
    }

    fn resource(kind: ResourceKind, id: &str, age_minutes: Option<i64>) -> DiscoveredResource {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        DiscoveredResource {
            kind,
            id: id.to_string(),
            run_id: "run-1".to_string(),
            image_name: None,
            created_at: age_minutes.map(|m| now - Duration::minutes(m)),
        }
    }

    #[test]
    fn test_discovered_requires_tool_and_run_tags() {
        let created = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let tags = vec![
            tag(TAG_TOOL, TAG_TOOL_VALUE),
            tag(TAG_RUN_ID, "run-1"),
            tag(TAG_IMAGE_NAME, "debian-12"),
            tag(TAG_CREATED_AT, &format_created_at(created)),
        ];
        let found = discovered(ResourceKind::Volume, "vol-0a1b2c3d", &tags).unwrap();
        assert_eq!(found.run_id, "run-1");
        assert_eq!(found.image_name.as_deref(), Some("debian-12"));
        assert_eq!(found.created_at, Some(created));

        let no_run = vec![tag(TAG_TOOL, TAG_TOOL_VALUE)];
        assert!(discovered(ResourceKind::Volume, "vol-0a1b2c3d", &no_run).is_none());

        let other_tool = vec![tag(TAG_TOOL, "something-else"), tag(TAG_RUN_ID, "run-1")];
        assert!(discovered(ResourceKind::Instance, "i-0a1b2c3d", &other_tool).is_none());
    }

    #[test]
    fn test_unregistered_snapshots_skips_image_backing_ones() {
        let found = vec![
            resource(ResourceKind::Snapshot, "snap-0a1b2c3d", Some(120)),
            resource(ResourceKind::Snapshot, "snap-0f0e0d0c", Some(120)),
        ];
        let referenced = HashSet::from(["snap-0f0e0d0c".to_string()]);

        let left: Vec<_> = unregistered_snapshots(found, &referenced)
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(left, vec!["snap-0a1b2c3d"]);
    }

    #[test]
    fn test_select_orphans_filters_by_age_and_orders_instances_first() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let resources = vec![
            resource(ResourceKind::Snapshot, "snap-old", Some(90)),
            resource(ResourceKind::Volume, "vol-old", Some(120)),
            resource(ResourceKind::Volume, "vol-young", Some(5)),
            resource(ResourceKind::Instance, "i-old", Some(61)),
            resource(ResourceKind::Instance, "i-untagged", None),
        ];

        let orphans = select_orphans(resources, Duration::hours(1), now);
        let ids: Vec<_> = orphans.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["i-old", "vol-old", "snap-old"]);
    }

    #[test]
    fn test_default_config_is_dry_run() {
        let config = CleanupConfig::default();
        assert!(config.dry_run);
        assert_eq!(config.min_age, Duration::hours(1));
        assert!(config.run_id.is_none());
    }

    #[test]
    fn test_tool_filters_include_run_id_when_given() {
        assert_eq!(tool_filters(None).len(), 1);
        let filters = tool_filters(Some("run-1"));
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[1].name(), Some("tag:img2ami:run-id"));
    }
}
