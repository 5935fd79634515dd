//! Artifact handling: mask decoding, normalization and object uploads.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::GenericImageView;
use uuid::Uuid;

use crate::errors::StorageError;
use crate::models::ArtifactInfo;
use crate::storage::ObjectStore;

/// Decode a base64 mask payload, with or without a data URL prefix.
pub fn decode_data_url(data: &str) -> anyhow::Result<Vec<u8>> {
    let encoded = match data.split_once(',') {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    Ok(BASE64.decode(encoded.trim())?)
}

pub fn encode_data_url(bytes: &[u8]) -> String {
    format!("data:image/png;base64,{}", BASE64.encode(bytes))
}

/// Normalize a painted mask (typically a red overlay with transparency)
/// into the single-channel black/white PNG the inpainting model expects.
pub fn normalize_mask(bytes: &[u8]) -> anyhow::Result<Vec<u8>> {
    let source = image::load_from_memory(bytes)?;
    let (width, height) = source.dimensions();
    let rgba = source.to_rgba8();

    let mut mask = image::GrayImage::new(width, height);
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let luma = (u16::from(r) + u16::from(g) + u16::from(b)) / 3;
        let painted = a > 0 && (r > 127 || luma > 127);
        mask.put_pixel(x, y, image::Luma([if painted { 255 } else { 0 }]));
    }

    let mut out = Vec::new();
    image::DynamicImage::ImageLuma8(mask).write_to(
        &mut std::io::Cursor::new(&mut out),
        image::ImageOutputFormat::Png,
    )?;
    Ok(out)
}

pub fn png_dimensions(bytes: &[u8]) -> anyhow::Result<(i32, i32)> {
    let (width, height) = image::load_from_memory(bytes)?.dimensions();
    Ok((width as i32, height as i32))
}

/// Upload one result image under its deterministic key and describe it.
pub async fn upload_image(
    storage: &ObjectStore,
    user_id: Uuid,
    task_id: Uuid,
    bytes: Vec<u8>,
    seed: Option<i64>,
) -> anyhow::Result<ArtifactInfo> {
    let artifact_id = Uuid::new_v4();
    let object_name = ObjectStore::image_key(user_id, task_id, artifact_id);
    let (width, height) = png_dimensions(&bytes)?;

    storage.put_object(&object_name, bytes, "image/png").await?;

    Ok(ArtifactInfo {
        id: artifact_id,
        url: storage.external_url(&object_name),
        object_name,
        width,
        height,
        seed,
    })
}

/// Upload a mask; returns the object key and its external URL.
pub async fn upload_mask(
    storage: &ObjectStore,
    user_id: Uuid,
    task_id: Uuid,
    bytes: Vec<u8>,
) -> Result<(String, String), StorageError> {
    let mask_id = Uuid::new_v4();
    let object_name = ObjectStore::mask_key(user_id, task_id, mask_id);
    storage.put_object(&object_name, bytes, "image/png").await?;
    let url = storage.external_url(&object_name);
    Ok((object_name, url))
}
