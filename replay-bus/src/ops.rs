//! Pixel operations on packed, row-major frame buffers.
//!
//! Every function works on caller-owned slices, never allocates and touches
//! no shared state, so they can run from any thread. Rows (or bytes) are
//! spread over the rayon pool.

use rayon::prelude::*;

use crate::error::{ReplayError, Result};
use crate::frame::Field;

/// Highest blend level; selects 100% of the first image.
pub const BLEND_LEVEL_MAX: u8 = 63;

fn check_len(what: &str, len: usize, need: usize) -> Result<()> {
    if len < need {
        return Err(ReplayError::InvalidFrame(format!(
            "{} buffer too small: {} < {}",
            what, len, need
        )));
    }
    Ok(())
}

/// Weaves two half-height fields into a full frame: output row `2i` is row
/// `i` of `field_even`, output row `2i + 1` is row `i` of `field_odd`.
pub fn interlace_fields(
    field_even: &[u8],
    field_odd: &[u8],
    dst: &mut [u8],
    width: usize,
    half_height: usize,
    stride: usize,
) -> Result<()> {
    let row = width * stride;
    let field_size = row * half_height;
    check_len("even field", field_even.len(), field_size)?;
    check_len("odd field", field_odd.len(), field_size)?;
    check_len("destination", dst.len(), field_size * 2)?;
    if field_size == 0 {
        return Ok(());
    }

    dst[..field_size * 2]
        .par_chunks_exact_mut(row * 2)
        .enumerate()
        .for_each(|(i, pair)| {
            let (even, odd) = pair.split_at_mut(row);
            even.copy_from_slice(&field_even[i * row..(i + 1) * row]);
            odd.copy_from_slice(&field_odd[i * row..(i + 1) * row]);
        });
    Ok(())
}

/// Combines two full-height frames: even rows come from `even_src`, odd rows
/// from `odd_src`, each at the same row index. An odd trailing row is taken
/// from `even_src`.
pub fn interlace_frames(
    even_src: &[u8],
    odd_src: &[u8],
    dst: &mut [u8],
    width: usize,
    height: usize,
    stride: usize,
) -> Result<()> {
    let row = width * stride;
    let size = row * height;
    check_len("even source", even_src.len(), size)?;
    check_len("odd source", odd_src.len(), size)?;
    check_len("destination", dst.len(), size)?;
    if size == 0 {
        return Ok(());
    }

    let paired = (height / 2) * row * 2;
    dst[..paired]
        .par_chunks_exact_mut(row * 2)
        .enumerate()
        .for_each(|(i, pair)| {
            let even_at = i * 2 * row;
            let odd_at = even_at + row;
            let (even, odd) = pair.split_at_mut(row);
            even.copy_from_slice(&even_src[even_at..even_at + row]);
            odd.copy_from_slice(&odd_src[odd_at..odd_at + row]);
        });
    if height % 2 == 1 {
        dst[paired..size].copy_from_slice(&even_src[paired..size]);
    }
    Ok(())
}

/// Line-doubles a single field to full height.
///
/// Even output rows are copies of the field rows. Odd output row `2i + 1`
/// is `(a >> 1) + (b >> 1)` of field rows `i` and `i + 1` (truncating). The
/// last field row has no successor, so the final odd row repeats it.
pub fn field_double(
    field: &[u8],
    dst: &mut [u8],
    width: usize,
    half_height: usize,
    stride: usize,
) -> Result<()> {
    let row = width * stride;
    let field_size = row * half_height;
    check_len("field", field.len(), field_size)?;
    check_len("destination", dst.len(), field_size * 2)?;
    if field_size == 0 {
        return Ok(());
    }

    dst[..field_size * 2]
        .par_chunks_exact_mut(row * 2)
        .enumerate()
        .for_each(|(i, pair)| {
            let (even, odd) = pair.split_at_mut(row);
            let current = &field[i * row..(i + 1) * row];
            even.copy_from_slice(current);
            if i + 1 < half_height {
                let next = &field[(i + 1) * row..(i + 2) * row];
                for ((o, a), b) in odd.iter_mut().zip(current).zip(next) {
                    *o = (a >> 1) + (b >> 1);
                }
            } else {
                odd.copy_from_slice(current);
            }
        });
    Ok(())
}

/// Cross-fades two images byte by byte with a 6-bit weight.
///
/// `level` is in `0..=63`: 63 yields `src_a`, 0 yields `src_b`, and 32 yields
/// `(a + b) >> 1`. Alpha bytes are blended like any other channel.
pub fn blend_images(
    src_a: &[u8],
    src_b: &[u8],
    dst: &mut [u8],
    width: usize,
    height: usize,
    stride: usize,
    level: u8,
) -> Result<()> {
    if level > BLEND_LEVEL_MAX {
        return Err(ReplayError::InvalidParameter(format!(
            "blend level {} out of range 0..={}",
            level, BLEND_LEVEL_MAX
        )));
    }
    let size = width * height * stride;
    check_len("first source", src_a.len(), size)?;
    check_len("second source", src_b.len(), size)?;
    check_len("destination", dst.len(), size)?;

    // the top level is promoted to the full 64/64 weight
    let weight_a: u32 = if level == BLEND_LEVEL_MAX {
        64
    } else {
        level as u32
    };
    let weight_b = 64 - weight_a;

    dst[..size]
        .par_iter_mut()
        .zip(src_a[..size].par_iter())
        .zip(src_b[..size].par_iter())
        .for_each(|((d, &a), &b)| {
            *d = ((a as u32 * weight_a + b as u32 * weight_b) >> 6) as u8;
        });
    Ok(())
}

/// Clears a frame to opaque black. With a 4-byte stride the alpha byte is
/// set to 255.
pub fn black_frame(dst: &mut [u8], width: usize, height: usize, stride: usize) -> Result<()> {
    if stride != 3 && stride != 4 {
        return Err(ReplayError::InvalidParameter(format!(
            "unsupported stride {}",
            stride
        )));
    }
    let size = width * height * stride;
    check_len("destination", dst.len(), size)?;

    dst[..size].par_chunks_exact_mut(stride).for_each(|px| {
        px[..3].fill(0);
        if stride == 4 {
            px[3] = 255;
        }
    });
    Ok(())
}

/// Copies one field out of a full frame: rows 0, 2, 4, ... for
/// [`Field::Upper`], rows 1, 3, 5, ... for [`Field::Lower`]. Writes
/// `height / 2` rows to `dst`.
pub fn extract_field(
    frame: &[u8],
    dst: &mut [u8],
    width: usize,
    height: usize,
    stride: usize,
    field: Field,
) -> Result<()> {
    let first = match field {
        Field::Upper => 0,
        Field::Lower => 1,
        Field::Progressive => {
            return Err(ReplayError::InvalidParameter(
                "a progressive frame has no field to extract".to_string(),
            ));
        }
    };
    let row = width * stride;
    let field_size = row * (height / 2);
    check_len("frame", frame.len(), row * height)?;
    check_len("destination", dst.len(), field_size)?;
    if field_size == 0 {
        return Ok(());
    }

    dst[..field_size]
        .par_chunks_exact_mut(row)
        .enumerate()
        .for_each(|(i, out)| {
            let at = (i * 2 + first) * row;
            out.copy_from_slice(&frame[at..at + row]);
        });
    Ok(())
}

#[cfg(test)]
#[path = "ops_test.rs"]
mod ops_test;
