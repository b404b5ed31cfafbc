use std::io::Write;

use proptest::prelude::*;
use tempfile::NamedTempFile;

use csv_unify::sampling::{
    build_sample_indices, count_lines, plan_blocks, stream_blocks, to_block,
};

#[test]
fn sample_indices_cover_endpoints() {
    let indices = build_sample_indices(1_000, 100);
    assert_eq!(indices.first(), Some(&0));
    assert_eq!(indices.last(), Some(&999));
}

#[test]
fn sample_indices_close_every_wide_gap() {
    let indices = build_sample_indices(50_000, 1_000);
    for pair in indices.windows(2) {
        assert!(
            pair[1] - pair[0] <= 1_000,
            "gap {} exceeds min_gap",
            pair[1] - pair[0]
        );
    }
}

#[test]
fn single_line_file_plans_one_block() {
    let plan = plan_blocks(1, 1_000, 100);
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].start_line, 0);
    assert_eq!(plan[0].end_line, 0);
}

#[test]
fn blocks_are_clipped_to_file_bounds() {
    let (start, end) = to_block(0, 100, 50);
    assert_eq!(start, 0);
    assert_eq!(end, 49);

    let (start, end) = to_block(99, 100, 50);
    assert_eq!(end, 99);
    assert_eq!(start, 50);
}

#[test]
fn overlapping_blocks_are_merged() {
    // Tiny file with a large block size collapses every index to one block.
    let plan = plan_blocks(10, 1_000, 2);
    assert_eq!(plan.len(), 1);
}

proptest! {
    #[test]
    fn planner_is_deterministic(total_lines in 1u64..200_000, min_gap in 1u64..10_000) {
        let first = build_sample_indices(total_lines, min_gap);
        let second = build_sample_indices(total_lines, min_gap);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.first().copied(), Some(0));
        prop_assert_eq!(first.last().copied(), Some(total_lines - 1));
        for pair in first.windows(2) {
            prop_assert!(pair[1] - pair[0] <= min_gap.max(1));
        }
    }

    #[test]
    fn planned_blocks_are_sorted_and_unique(
        total_lines in 1u64..100_000,
        block_size in 1u64..5_000,
        min_gap in 1u64..5_000,
    ) {
        let plan = plan_blocks(total_lines, block_size, min_gap);
        for pair in plan.windows(2) {
            prop_assert!(pair[0].start_line < pair[1].start_line);
        }
        for block in &plan {
            prop_assert!(block.end_line < total_lines);
            prop_assert!(block.end_line - block.start_line + 1 <= block_size.max(1));
        }
    }
}

#[test]
fn count_lines_handles_missing_trailing_newline() {
    let mut file = NamedTempFile::new().expect("temp file");
    write!(file, "a\nb\nc").unwrap();
    assert_eq!(count_lines(file.path()).unwrap(), 3);

    let mut file = NamedTempFile::new().expect("temp file");
    writeln!(file, "a\nb\nc").unwrap();
    assert_eq!(count_lines(file.path()).unwrap(), 3);
}

#[test]
fn count_lines_empty_file_is_zero() {
    let file = NamedTempFile::new().expect("temp file");
    assert_eq!(count_lines(file.path()).unwrap(), 0);
}

#[test]
fn stream_blocks_delivers_exact_line_ranges() {
    let mut file = NamedTempFile::new().expect("temp file");
    for i in 0..100 {
        writeln!(file, "row-{i}").unwrap();
    }
    let plan = plan_blocks(100, 10, 30);
    let mut seen = Vec::new();
    stream_blocks(file.path(), &plan, encoding_rs::UTF_8, |block, buffer| {
        seen.push((block.start_line, block.end_line, buffer.lines.clone()));
        Ok(())
    })
    .unwrap();

    assert_eq!(seen.len(), plan.len());
    for (start, end, lines) in &seen {
        assert_eq!(lines.len() as u64, end - start + 1);
        assert_eq!(lines[0], format!("row-{start}"));
        assert_eq!(lines[lines.len() - 1], format!("row-{end}"));
    }
}

#[test]
fn stream_blocks_reports_byte_spans() {
    let mut file = NamedTempFile::new().expect("temp file");
    for i in 0..20 {
        writeln!(file, "{i:04}").unwrap();
    }
    let plan = plan_blocks(20, 5, 4);
    let mut spans = Vec::new();
    stream_blocks(file.path(), &plan, encoding_rs::UTF_8, |_, buffer| {
        spans.push((buffer.byte_start, buffer.byte_end));
        Ok(())
    })
    .unwrap();
    for (start, end) in spans {
        assert!(end > start);
        // Each line is 5 bytes ("0000\n").
        assert_eq!((end - start) % 5, 0);
    }
}

#[test]
fn stream_blocks_decodes_windows_1251() {
    let mut file = NamedTempFile::new().expect("temp file");
    // "город" (city) encoded as Windows-1251 plus an ASCII line.
    file.write_all(&[0xE3, 0xEE, 0xF0, 0xEE, 0xE4, b'\n']).unwrap();
    file.write_all(b"plain\n").unwrap();

    let plan = plan_blocks(2, 10, 1);
    let mut lines = Vec::new();
    stream_blocks(file.path(), &plan, encoding_rs::WINDOWS_1251, |_, buffer| {
        lines.extend(buffer.lines.clone());
        Ok(())
    })
    .unwrap();
    assert_eq!(lines, vec!["город".to_string(), "plain".to_string()]);
}
