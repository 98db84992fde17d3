use std::future::Future;

use anyhow::Result;
use hf_hub::api::tokio::Api;

use crate::{DeviceMap, ModelLike};

/// Fetches a pipeline's weights from the Hugging Face hub and places them on a device.
pub trait Loader {
    type Model: ModelLike;

    fn load(api: Api, device_map: DeviceMap) -> impl Future<Output = Result<Self::Model>>
    where
        Self: Sized;
}
