//! Browser-based upload grants (S3 POST policy, Signature Version 4).
//!
//! The client receives a URL plus form fields; the store only accepts the
//! upload if the request satisfies every condition baked into the signed policy.

use aws_credential_types::Credentials;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};
use std::collections::BTreeMap;

use crate::utils::hash::hmac_sha256;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";

/// What the grant allows
#[derive(Debug, Clone)]
pub struct GrantConditions {
    pub content_type: String,
    /// Inclusive upper bound of the accepted byte range; the lower bound is 1
    pub max_file_size: u64,
    pub expires_in: std::time::Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedPost {
    pub url: String,
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct PostPolicySigner {
    region: String,
    endpoint: Option<String>,
}

impl PostPolicySigner {
    pub fn new(region: impl Into<String>, endpoint: Option<String>) -> Self {
        Self {
            region: region.into(),
            endpoint,
        }
    }

    /// Form target. Virtual-hosted style on AWS, path style on custom endpoints.
    pub fn upload_url(&self, bucket: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), bucket),
            None => format!("https://{}.s3.{}.amazonaws.com/", bucket, self.region),
        }
    }

    pub fn sign(
        &self,
        credentials: &Credentials,
        bucket: &str,
        key: &str,
        conditions: &GrantConditions,
        now: DateTime<Utc>,
    ) -> PresignedPost {
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let credential = format!(
            "{}/{}/{}/{}/aws4_request",
            credentials.access_key_id(),
            date_stamp,
            self.region,
            SERVICE
        );

        let expires_in = Duration::from_std(conditions.expires_in).unwrap_or(Duration::zero());
        let expiration = (now + expires_in).format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();

        let mut fields = BTreeMap::new();
        fields.insert("key".to_string(), key.to_string());
        fields.insert("Content-Type".to_string(), conditions.content_type.clone());
        fields.insert("x-amz-algorithm".to_string(), ALGORITHM.to_string());
        fields.insert("x-amz-credential".to_string(), credential.clone());
        fields.insert("x-amz-date".to_string(), amz_date.clone());

        let mut policy_conditions: Vec<Value> = vec![
            json!({ "bucket": bucket }),
            json!({ "key": key }),
            json!({ "Content-Type": conditions.content_type }),
            json!(["content-length-range", 1, conditions.max_file_size]),
            json!({ "x-amz-algorithm": ALGORITHM }),
            json!({ "x-amz-credential": credential }),
            json!({ "x-amz-date": amz_date }),
        ];

        if let Some(token) = credentials.session_token() {
            fields.insert("x-amz-security-token".to_string(), token.to_string());
            policy_conditions.push(json!({ "x-amz-security-token": token }));
        }

        let policy = json!({
            "expiration": expiration,
            "conditions": policy_conditions,
        });
        let encoded_policy = STANDARD.encode(policy.to_string());

        let signing_key = self.signing_key(credentials.secret_access_key(), &date_stamp);
        let signature = hex::encode(hmac_sha256(&signing_key, encoded_policy.as_bytes()));

        fields.insert("policy".to_string(), encoded_policy);
        fields.insert("x-amz-signature".to_string(), signature);

        PresignedPost {
            url: self.upload_url(bucket),
            fields,
        }
    }

    fn signing_key(&self, secret: &str, date_stamp: &str) -> Vec<u8> {
        let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date_stamp.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, SERVICE.as_bytes());
        hmac_sha256(&k_service, b"aws4_request")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn creds(token: Option<&str>) -> Credentials {
        Credentials::new(
            "AKIDEXAMPLE",
            "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY",
            token.map(str::to_string),
            None,
            "test",
        )
    }

    fn conditions() -> GrantConditions {
        GrantConditions {
            content_type: "application/xml".to_string(),
            max_file_size: 52428800,
            expires_in: std::time::Duration::from_secs(300),
        }
    }

    fn instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()
    }

    fn decode_policy(post: &PresignedPost) -> Value {
        let raw = STANDARD.decode(&post.fields["policy"]).unwrap();
        serde_json::from_slice(&raw).unwrap()
    }

    #[test]
    fn test_policy_conditions() {
        let signer = PostPolicySigner::new("eu-north-1", None);
        let post = signer.sign(
            &creds(None),
            "bucket",
            "1/raw/llmprep.xml",
            &conditions(),
            instant(),
        );

        assert_eq!(post.url, "https://bucket.s3.eu-north-1.amazonaws.com/");
        assert_eq!(post.fields["key"], "1/raw/llmprep.xml");
        assert_eq!(post.fields["Content-Type"], "application/xml");
        assert_eq!(
            post.fields["x-amz-credential"],
            "AKIDEXAMPLE/20240506/eu-north-1/s3/aws4_request"
        );
        assert_eq!(post.fields["x-amz-date"], "20240506T070809Z");
        assert!(!post.fields.contains_key("x-amz-security-token"));

        let policy = decode_policy(&post);
        assert_eq!(policy["expiration"], "2024-05-06T07:13:09.000Z");
        let conds = policy["conditions"].as_array().unwrap();
        assert!(conds.contains(&json!(["content-length-range", 1, 52428800])));
        assert!(conds.contains(&json!({ "Content-Type": "application/xml" })));
        assert!(conds.contains(&json!({ "bucket": "bucket" })));
    }

    #[test]
    fn test_signature_is_reproducible() {
        let signer = PostPolicySigner::new("eu-north-1", None);
        let a = signer.sign(&creds(None), "b", "k", &conditions(), instant());
        let b = signer.sign(&creds(None), "b", "k", &conditions(), instant());
        assert_eq!(a, b);
        assert_eq!(a.fields["x-amz-signature"].len(), 64);

        let later = signer.sign(
            &creds(None),
            "b",
            "k",
            &conditions(),
            instant() + Duration::seconds(1),
        );
        assert_ne!(a.fields["x-amz-signature"], later.fields["x-amz-signature"]);
    }

    #[test]
    fn test_session_token_is_bound() {
        let signer = PostPolicySigner::new("eu-north-1", None);
        let post = signer.sign(&creds(Some("tok")), "b", "k", &conditions(), instant());
        assert_eq!(post.fields["x-amz-security-token"], "tok");
        let policy = decode_policy(&post);
        assert!(
            policy["conditions"]
                .as_array()
                .unwrap()
                .contains(&json!({ "x-amz-security-token": "tok" }))
        );
    }

    #[test]
    fn test_custom_endpoint_uses_path_style() {
        let signer =
            PostPolicySigner::new("us-east-1", Some("http://127.0.0.1:9000/".to_string()));
        assert_eq!(signer.upload_url("dev"), "http://127.0.0.1:9000/dev");
    }
}
