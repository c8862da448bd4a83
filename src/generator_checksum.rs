//! Built-in `checksum` generator: a SHA-256 digest per file.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::models::{Descendant, DerivativeType, Object, ProposedDerivative};
use crate::traits::{ByteSource, Generator};

pub struct ChecksumGenerator;

#[async_trait]
impl Generator for ChecksumGenerator {
    fn name(&self) -> &str {
        "checksum"
    }

    fn version(&self) -> &str {
        "1"
    }

    fn description(&self) -> &str {
        "SHA-256 digest of file contents"
    }

    fn check(&self, object: &Object, _children: Option<&[Object]>) -> Result<Vec<ProposedDerivative>> {
        if object.is_directory() || object.is_bucket() {
            return Ok(Vec::new());
        }
        Ok(vec![ProposedDerivative {
            name: "sha256".to_string(),
            derivative_type: DerivativeType::Metadata,
            dependencies: vec![object.clone()],
        }])
    }

    async fn compute(
        &self,
        target: &Descendant,
        _derivative: &ProposedDerivative,
        bytes: &ByteSource<'_>,
    ) -> Result<Value> {
        let data = bytes.fetch(&target.key).await?;
        let digest = Sha256::digest(&data);
        Ok(json!({
            "sha256": hex::encode(digest),
            "size": data.len(),
        }))
    }
}
