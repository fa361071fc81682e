//! Record shapes for the synchronized collections

pub mod credit;
pub mod especial;
pub(crate) mod lenient;
pub mod product;

pub use credit::{Credit, CreditLine, CreditStatus, Delivery};
pub use especial::Especial;
pub use product::Product;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::Rng;
use url::Url;

use crate::error::{Error, Result};

/// An image embedded as a base64 `data:` URL.
pub type Photo = String;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Render `n` in base 36, lowercase.
pub fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

/// `len` random base-36 characters.
pub fn random_base36(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}

/// Client-generated product identifier: creation time in base 36 followed by
/// a random suffix.
pub fn generate_id(now_ms: i64) -> String {
    format!("{}{}", to_base36(now_ms.max(0) as u64), random_base36(10))
}

/// A scan code is 12 or 13 ASCII digits.
pub fn is_valid_upc(code: &str) -> bool {
    (12..=13).contains(&code.len()) && code.bytes().all(|b| b.is_ascii_digit())
}

/// Accept an empty image reference or an absolute http(s) URL.
pub fn validate_image_url(raw: &str) -> Result<()> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(());
    }
    let url = Url::parse(raw).map_err(|e| Error::validation(format!("invalid image URL: {}", e)))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::validation(format!(
            "image URL scheme '{}' is not allowed",
            other
        ))),
    }
}

/// Embed an image as a `data:` URL.
pub fn photo_data_url(mime: &str, bytes: &[u8]) -> Result<Photo> {
    if !mime.starts_with("image/") {
        return Err(Error::validation(format!("'{}' is not an image type", mime)));
    }
    Ok(format!("data:{};base64,{}", mime, STANDARD.encode(bytes)))
}

/// Check that a stored photo is an embedded base64 image.
pub fn validate_photo(photo: &str) -> Result<()> {
    let rest = photo
        .strip_prefix("data:image/")
        .ok_or_else(|| Error::validation("photo must be an embedded image"))?;
    let (_, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| Error::validation("photo must be base64 encoded"))?;
    STANDARD
        .decode(payload)
        .map(|_| ())
        .map_err(|e| Error::validation(format!("photo is not valid base64: {}", e)))
}
