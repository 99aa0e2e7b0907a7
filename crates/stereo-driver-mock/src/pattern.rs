//! Synthetic image planes for simulated stereo cameras.

/// Simple pseudo-random number generator (LCG) for reproducible noise.
#[inline]
fn prng(seed: u64) -> u64 {
    seed.wrapping_mul(1103515245).wrapping_add(12345) & 0x7fffffff
}

/// Horizontal shift, in pixels, between the two sensors' views.
pub const SENSOR_SHIFT: u32 = 12;

/// 8-bit sensor plane: a drifting diagonal gradient with light noise.
///
/// Sensor 2 sees the scene shifted by [`SENSOR_SHIFT`] so the pair looks like
/// a stereo view.
pub fn sensor_plane(width: u32, height: u32, frame_num: u64, sensor: u8) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let shift = if sensor == 2 { SENSOR_SHIFT as usize } else { 0 };
    let drift = (frame_num as usize) * 3;
    let frame_seed = frame_num.wrapping_mul(2654435761) ^ u64::from(sensor);

    let mut plane = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            let base = ((x + shift + y + drift) * 255 / (w + h).max(1)) as i32;
            let noise = (prng(frame_seed ^ idx as u64) & 0x7) as i32 - 4;
            plane[idx] = (base + noise).clamp(0, 255) as u8;
        }
    }
    plane
}

/// 16-bit disparity plane in 1/64 pixel units.
///
/// A smooth ramp from 16 to 48 pixels, an invalid band on the left edge where
/// no match is possible, and isolated single-pixel speckles every 97 pixels.
pub fn disparity_plane(width: u32, height: u32, frame_num: u64) -> Vec<u16> {
    let w = width as usize;
    let h = height as usize;
    let invalid_band = (w / 16).max(1);

    let mut plane = vec![0u16; w * h];
    for y in 0..h {
        for x in invalid_band..w {
            let idx = y * w + x;
            let pixels = 16 + (x * 32) / w.max(1);
            plane[idx] = (pixels * 64) as u16;
        }
    }
    let offset = (frame_num % 97) as usize;
    for idx in (offset..w * h).step_by(97) {
        if plane[idx] != 0 {
            plane[idx] = plane[idx].saturating_add(40 * 64);
        }
    }
    plane
}

/// Run-length encode bytes as `(count, value)` pairs.
pub fn rle_encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 2);
    let mut iter = data.iter().copied().peekable();
    while let Some(value) = iter.next() {
        let mut count = 1u8;
        while count < u8::MAX && iter.peek() == Some(&value) {
            iter.next();
            count += 1;
        }
        out.push(count);
        out.push(value);
    }
    out
}

/// Decode `(count, value)` pairs into `output`; returns bytes written.
pub fn rle_decode(encoded: &[u8], output: &mut [u8]) -> Result<usize, String> {
    if encoded.len() % 2 != 0 {
        return Err("truncated run-length stream".into());
    }
    let mut pos = 0;
    for pair in encoded.chunks_exact(2) {
        let (count, value) = (pair[0] as usize, pair[1]);
        let end = pos + count;
        if end > output.len() {
            return Err(format!("decoded image exceeds {} bytes", output.len()));
        }
        output[pos..end].fill(value);
        pos = end;
    }
    Ok(pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planes_have_expected_size() {
        assert_eq!(sensor_plane(64, 48, 0, 1).len(), 64 * 48);
        assert_eq!(disparity_plane(64, 48, 0).len(), 64 * 48);
    }

    #[test]
    fn disparity_has_invalid_band_and_speckles() {
        let plane = disparity_plane(64, 4, 0);
        assert!(plane[..4].iter().all(|&v| v == 0));
        // Index 97 lies on row 1, column 33: a speckle 40px above the ramp.
        assert_eq!(plane[97], ((16 + 33 * 32 / 64 + 40) * 64) as u16);
    }

    #[test]
    fn rle_restores_input() {
        let data: Vec<u8> = std::iter::repeat(9u8)
            .take(300)
            .chain([1, 2, 2, 3])
            .collect();
        let encoded = rle_encode(&data);
        let mut out = vec![0u8; data.len()];
        assert_eq!(rle_decode(&encoded, &mut out).unwrap(), data.len());
        assert_eq!(out, data);
    }

    #[test]
    fn rle_rejects_overflowing_output() {
        let encoded = rle_encode(&[5u8; 10]);
        let mut out = vec![0u8; 4];
        assert!(rle_decode(&encoded, &mut out).is_err());
    }
}
