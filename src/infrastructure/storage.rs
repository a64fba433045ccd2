use aws_config::SdkConfig;
use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::services::post_policy::PostPolicySigner;
use crate::services::storage::S3ObjectStore;

pub fn setup_storage(config: &AppConfig, sdk: &SdkConfig) -> Arc<S3ObjectStore> {
    let mut builder = aws_sdk_s3::config::Builder::from(sdk);
    if let Some(endpoint) = &config.s3_endpoint {
        info!("☁️  S3 Storage: {} (Bucket: {})", endpoint, config.bucket_name);
        builder = builder.endpoint_url(endpoint).force_path_style(true);
    } else {
        info!(
            "☁️  S3 Storage: region {} (Bucket: {})",
            config.region, config.bucket_name
        );
    }

    let client = aws_sdk_s3::Client::from_conf(builder.build());
    let signer = PostPolicySigner::new(config.region.clone(), config.s3_endpoint.clone());

    Arc::new(S3ObjectStore::new(
        client,
        config.bucket_name.clone(),
        sdk.credentials_provider(),
        signer,
    ))
}
