use bytes::{Bytes, BytesMut};

use crate::{
    error::{ReplayError, Result},
    format::{FieldMode, VideoFormat},
    frame::{Field, FieldRecord, ReplayFrame},
    ops::extract_field,
};

/// Splits a source frame into the records stored for it.
///
/// Progressive formats give one full-height record. Interlaced formats give
/// two `height / 2` records, one per field, in the format's temporal order
/// (upper then lower for [`FieldMode::Upper`], the reverse for
/// [`FieldMode::Lower`]). The audio is cut at the middle byte: the first
/// record gets the first half, the second record the rest.
pub fn split_frame(frame: &ReplayFrame, format: &VideoFormat) -> Result<Vec<FieldRecord>> {
    let size = format.image_size();
    let image = frame.image();
    if image.len() < size {
        return Err(ReplayError::InvalidFrame(format!(
            "image is {} bytes, {} needs {}",
            image.len(),
            format,
            size
        )));
    }

    let order = match format.field_mode {
        FieldMode::Progressive => {
            return Ok(vec![FieldRecord {
                field: Field::Progressive,
                width: format.width,
                height: format.height,
                image: image.slice(..size),
                audio: frame.audio().clone(),
            }]);
        }
        FieldMode::Upper => [Field::Upper, Field::Lower],
        FieldMode::Lower => [Field::Lower, Field::Upper],
    };

    let audio = frame.audio();
    let half = audio.len() / 2;
    let halves = [audio.slice(..half), audio.slice(half..)];

    order
        .into_iter()
        .zip(halves)
        .map(|(field, audio)| {
            Ok(FieldRecord {
                field,
                width: format.width,
                height: format.height / 2,
                image: field_image(image, format, field)?,
                audio,
            })
        })
        .collect()
}

fn field_image(image: &Bytes, format: &VideoFormat, field: Field) -> Result<Bytes> {
    let width = format.width as usize;
    let height = format.height as usize;
    let stride = format.stride();
    let mut buf = BytesMut::zeroed(width * (height / 2) * stride);
    extract_field(image, &mut buf, width, height, stride, field)?;
    Ok(buf.freeze())
}
