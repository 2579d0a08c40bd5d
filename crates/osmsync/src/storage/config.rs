use crate::error::{SyncError, SyncResult};
use aws_sdk_s3::types::ObjectCannedAcl;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;

/// Canned ACL attached to every object osmsync writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectAcl {
    #[default]
    Private,
    PublicRead,
    PublicReadWrite,
    AuthenticatedRead,
    AwsExecRead,
    BucketOwnerRead,
    BucketOwnerFullControl,
}

impl ObjectAcl {
    pub const ALL: [ObjectAcl; 7] = [
        ObjectAcl::Private,
        ObjectAcl::PublicRead,
        ObjectAcl::PublicReadWrite,
        ObjectAcl::AuthenticatedRead,
        ObjectAcl::AwsExecRead,
        ObjectAcl::BucketOwnerRead,
        ObjectAcl::BucketOwnerFullControl,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ObjectAcl::Private => "private",
            ObjectAcl::PublicRead => "public-read",
            ObjectAcl::PublicReadWrite => "public-read-write",
            ObjectAcl::AuthenticatedRead => "authenticated-read",
            ObjectAcl::AwsExecRead => "aws-exec-read",
            ObjectAcl::BucketOwnerRead => "bucket-owner-read",
            ObjectAcl::BucketOwnerFullControl => "bucket-owner-full-control",
        }
    }

    pub fn to_canned(self) -> ObjectCannedAcl {
        ObjectCannedAcl::from(self.as_str())
    }
}

impl fmt::Display for ObjectAcl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectAcl {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|acl| acl.as_str() == s)
            .ok_or_else(|| SyncError::config(format!("unknown S3 ACL '{}'", s)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    /// Static credentials; the default AWS provider chain is used when absent
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
    pub acl: ObjectAcl,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: "us-east-1".to_string(),
            bucket: "osmsync".to_string(),
            access_key: None,
            secret_key: None,
            path_style: false,
            acl: ObjectAcl::Private,
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> SyncResult<Self> {
        let acl = match env::var("S3_ACL") {
            Ok(value) => value.parse()?,
            Err(_) => ObjectAcl::default(),
        };

        Ok(Self {
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| "osmsync".to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .ok(),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .ok(),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            acl,
        })
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            bucket: bucket.into(),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_for_minio() {
        let config = StorageConfig::for_minio("http://localhost:9000", "osm");
        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:9000"));
        assert_eq!(config.bucket, "osm");
        assert!(config.path_style);
        assert_eq!(config.acl, ObjectAcl::Private);
    }

    #[test]
    fn test_acl_parsing() {
        assert_eq!("public-read".parse::<ObjectAcl>().unwrap(), ObjectAcl::PublicRead);
        assert_eq!(
            "bucket-owner-full-control".parse::<ObjectAcl>().unwrap(),
            ObjectAcl::BucketOwnerFullControl
        );
        assert!("world-writable".parse::<ObjectAcl>().is_err());
        assert_eq!(ObjectAcl::PublicRead.to_canned(), ObjectCannedAcl::PublicRead);
    }
}
