use rayon::prelude::*;

use super::DifferenceKernel;
use crate::frame::Frame;

pub(super) fn apply(kernel: &DifferenceKernel, previous: &Frame, current: &Frame, output: &mut [u8]) {
    let format = current.format();
    assert_eq!(
        (previous.format().width, previous.format().height),
        (format.width, format.height),
        "previous/current size mismatch"
    );
    assert_eq!(output.len(), format.size_in_bytes(), "output size mismatch");

    let row_bytes = format.row_bytes();
    output
        .par_chunks_exact_mut(row_bytes)
        .enumerate()
        .for_each(|(y, out_row)| {
            let prev_row = previous.row(y as u32);
            let cur_row = current.row(y as u32);

            for ((out, prev), cur) in out_row
                .chunks_exact_mut(4)
                .zip(prev_row.chunks_exact(4))
                .zip(cur_row.chunks_exact(4))
            {
                let encoded = kernel.encode_pixel(
                    [prev[0], prev[1], prev[2], prev[3]],
                    [cur[0], cur[1], cur[2], cur[3]],
                );
                out.copy_from_slice(&encoded);
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::test_utils::{frame_with_square, solid_frame};
    use crate::kernel::is_changed;

    #[test]
    fn identical_frames_produce_no_sentinel() {
        let frame = solid_frame(16, 8, 90);
        let mut output = vec![0u8; frame.format().size_in_bytes()];

        DifferenceKernel::default().apply_cpu(&frame, &frame, &mut output);

        assert!(output.chunks_exact(4).all(|px| !is_changed([px[0], px[1], px[2], px[3]])));
    }

    #[test]
    fn moved_square_marks_exactly_its_pixels() {
        let previous = solid_frame(16, 8, 0);
        let current = frame_with_square(16, 8, 0, (4, 2), 3, 255);
        let mut output = vec![0u8; current.format().size_in_bytes()];

        DifferenceKernel::default().apply_cpu(&previous, &current, &mut output);

        let row_bytes = current.format().row_bytes();
        for y in 0..8usize {
            for x in 0..16usize {
                let offset = y * row_bytes + x * 4;
                let px = &output[offset..offset + 4];
                let inside = (4..7).contains(&x) && (2..5).contains(&y);
                assert_eq!(
                    is_changed([px[0], px[1], px[2], px[3]]),
                    inside,
                    "pixel ({}, {})",
                    x,
                    y
                );
            }
        }
    }

    #[test]
    fn padded_frames_are_read_by_row() {
        let format = crate::common::FormatDescriptor::bgra(2, 2);
        let mut bytes = vec![0u8; 2 * 12];
        for y in 0..2 {
            for x in 0..2 {
                bytes[y * 12 + x * 4..y * 12 + x * 4 + 4].copy_from_slice(&[255, 255, 255, 255]);
            }
        }
        let padded = Frame::with_stride(format, 12, bytes).unwrap();
        let black = solid_frame(2, 2, 0);
        let mut output = vec![0u8; format.size_in_bytes()];

        DifferenceKernel::default().apply_cpu(&black, &padded, &mut output);

        assert!(output.chunks_exact(4).all(|px| is_changed([px[0], px[1], px[2], px[3]])));
    }
}
