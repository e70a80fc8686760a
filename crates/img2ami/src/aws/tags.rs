//! EC2 tag specifications for resources created during a run

use aws_sdk_ec2::types::{ResourceType, Tag, TagSpecification};
use chrono::{DateTime, Utc};
use img2ami_common::tags::{
    TAG_CREATED_AT, TAG_IMAGE_NAME, TAG_RUN_ID, TAG_TOOL, TAG_TOOL_VALUE, format_created_at,
};

/// Tags shared by every resource of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTags {
    pub run_id: String,
    pub image_name: String,
}

impl RunTags {
    pub fn new(run_id: impl Into<String>, image_name: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            image_name: image_name.into(),
        }
    }

    /// Name tag shown in the console, e.g. `img2ami-worker-my-image`
    pub fn display_name(&self, role: &str) -> String {
        format!("{TAG_TOOL_VALUE}-{role}-{}", self.image_name)
    }

    /// Key/value pairs for a resource created at `created_at`
    pub fn pairs(&self, role: &str, created_at: DateTime<Utc>) -> Vec<(&'static str, String)> {
        vec![
            (TAG_TOOL, TAG_TOOL_VALUE.to_string()),
            (TAG_RUN_ID, self.run_id.clone()),
            (TAG_CREATED_AT, format_created_at(created_at)),
            (TAG_IMAGE_NAME, self.image_name.clone()),
            ("Name", self.display_name(role)),
        ]
    }

    /// Build a TagSpecification for a resource created now
    pub fn spec(&self, resource_type: ResourceType, role: &str) -> TagSpecification {
        self.pairs(role, Utc::now())
            .into_iter()
            .fold(
                TagSpecification::builder().resource_type(resource_type),
                |builder, (key, value)| builder.tags(Tag::builder().key(key).value(value).build()),
            )
            .build()
    }
}
