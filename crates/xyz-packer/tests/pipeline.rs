use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::tempdir;
use xyz_packer::container::ArrayData;
use xyz_packer::mirror::load_mirror;
use xyz_packer::reader::{read_config, summarize};
use xyz_packer::tokenizer::split_lines;
use xyz_packer::{LayoutConfig, PackOptions, decode_lines, pack_xyz};

const WATER: &str = "3\n\
Lattice=\"10 0 0 0 10 0 0 0 10\" Properties=species:S:1:pos:R:3:forces:R:3 dft_energy=-14.25 source=\"manual\"\n\
O 0.000 0.000 0.000 0.0 0.0 0.1\n\
H 0.757 0.586 0.000 0.0 0.1 0.0\n\
H -0.757 0.586 0.000 0.1 0.0 0.0\n";

const METHANE_FRAGMENT: &str = "3\n\
Properties=species:S:1:pos:R:3 config_type=MD\n\
C 0.0 0.0 0.0\n\
H 0.63 0.63 0.63\n\
H -0.63 -0.63 0.63\n";

fn options(dir: &Path, input: &Path, batch_size: usize) -> PackOptions {
    PackOptions {
        input: input.to_path_buf(),
        output: dir.join("out.npt"),
        mirror: None,
        layout: LayoutConfig {
            batch_size,
            ..LayoutConfig::default()
        },
        overwrite: false,
        parallel_sinks: false,
        workers: None,
    }
}

#[test]
fn separators_do_not_change_decoded_structures() {
    let reference = format!("{WATER}\n{METHANE_FRAGMENT}\n{WATER}");
    let packed = format!("{WATER}{METHANE_FRAGMENT}{WATER}");
    let noisy = format!("\n\n{WATER}\n\n\n{METHANE_FRAGMENT}   \n\n{WATER}\n\n");

    let expected = decode_lines(&split_lines(&reference), None);
    assert_eq!(expected.structures.len(), 3);
    for text in [packed, noisy] {
        let outcome = decode_lines(&split_lines(&text), None);
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.structures, expected.structures);
    }
}

#[test]
fn back_to_back_blocks_with_batch_size_one() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("pair.xyz");
    fs::write(&input, format!("{WATER}{METHANE_FRAGMENT}")).unwrap();

    let summary = pack_xyz(options(tmp.path(), &input, 1)).unwrap();
    assert_eq!(summary.found, 2);
    assert_eq!(summary.decoded, 2);
    assert_eq!(summary.batches, 2);
    assert_eq!(summary.written, 2);

    let out = tmp.path().join("out.npt");
    let first = read_config(&out, 0, 0).unwrap();
    let second = read_config(&out, 1, 0).unwrap();
    assert_eq!(first.positions.len(), 3);
    assert_eq!(second.positions.len(), 3);
    assert_eq!(first.atomic_numbers, vec![8, 1, 1]);
    assert_eq!(second.atomic_numbers, vec![6, 1, 1]);
    assert_eq!(first.config_type, "DFT");
    assert_eq!(second.config_type, "MD");
    assert_eq!(first.pbc, [true; 3]);
    assert_eq!(second.pbc, [false; 3]);
    assert_eq!(first.cell[1], [0.0, 10.0, 0.0]);

    assert_eq!(first.properties["dft_energy"].shape(), &[1]);
    assert_eq!(
        first.properties["dft_energy"].data(),
        &ArrayData::F64(vec![-14.25])
    );
    assert_eq!(first.properties["forces"].shape(), &[3, 3]);
    assert!(!first.properties.contains_key("source"));
}

#[test]
fn incomplete_tail_keeps_earlier_blocks() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("truncated.xyz");
    let text = format!("{WATER}5\ntruncated\nH 0 0 0\nH 0 0 1\nH 0 0 2\n");
    fs::write(&input, text).unwrap();

    let summary = pack_xyz(options(tmp.path(), &input, 50)).unwrap();
    assert_eq!(summary.decoded, 1);
    assert_eq!(summary.incomplete.len(), 1);
    assert_eq!(summary.incomplete[0].source.as_deref(), Some(input.as_path()));
    let tail = summary.incomplete[0].block;
    assert_eq!(tail.line, 5);
    assert_eq!(tail.declared, 5);
    assert_eq!(tail.available, 3);

    let tree = summarize(&tmp.path().join("out.npt")).unwrap();
    assert_eq!(tree.configs, 1);
    assert_eq!(tree.atoms, 3);
}

#[test]
fn truncated_file_does_not_swallow_the_next_one() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path().join("inputs");
    fs::create_dir(&dir).unwrap();
    fs::write(
        dir.join("a.xyz"),
        "1\nok\nH 0 0 0\n5\ntrunc\nH 0 0 0\nH 0 0 1\nH 0 0 2\n",
    )
    .unwrap();
    fs::write(
        dir.join("b.xyz"),
        "1\nfirst\nHe 0 0 0\n1\nsecond\nLi 0 0 0\n",
    )
    .unwrap();

    let summary = pack_xyz(options(tmp.path(), &dir, 50)).unwrap();
    assert_eq!(summary.found, 3);
    assert_eq!(summary.decoded, 3);
    assert_eq!(summary.failed(), 0);
    assert_eq!(summary.incomplete.len(), 1);
    let tail = &summary.incomplete[0];
    assert_eq!(tail.source.as_deref(), Some(dir.join("a.xyz").as_path()));
    assert_eq!(tail.block.line, 3);
    assert_eq!(tail.block.declared, 5);
    assert_eq!(tail.block.available, 3);

    let out = tmp.path().join("out.npt");
    let numbers: Vec<i64> = (0..3)
        .flat_map(|i| read_config(&out, 0, i).unwrap().atomic_numbers)
        .collect();
    assert_eq!(numbers, vec![1, 2, 3]);
}

#[test]
fn ordinals_run_across_files() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path().join("inputs");
    fs::create_dir(&dir).unwrap();
    fs::write(dir.join("a.xyz"), WATER).unwrap();
    fs::write(dir.join("b.xyz"), format!("{WATER}1\nc\nH 0 0\n")).unwrap();

    let summary = pack_xyz(options(tmp.path(), &dir, 50)).unwrap();
    assert_eq!(summary.found, 3);
    assert_eq!(summary.failures[0].ordinal, 3);
    assert_eq!(summary.failures[0].line, 6);
}

#[test]
fn non_finite_values_never_reach_the_mirror() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("nan.xyz");
    fs::write(&input, format!("1\nenergy=nan\nH 0 0 inf\n{WATER}")).unwrap();
    let mirror = tmp.path().join("nan.sqlite");
    let opts = PackOptions {
        mirror: Some(mirror.clone()),
        ..options(tmp.path(), &input, 50)
    };

    let summary = pack_xyz(opts).unwrap();
    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.mirrored, Some(1));
    let records = load_mirror(&mirror).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].1.formula(), "H2O");
}

#[test]
fn decode_failures_are_skipped_and_batches_stay_dense() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("mixed.xyz");
    let bad = "2\nProperties=species:S:1:pos:R:3\nH 0 0\nH 0 0 1\n";
    fs::write(&input, format!("{WATER}{bad}{WATER}{WATER}")).unwrap();

    let summary = pack_xyz(options(tmp.path(), &input, 2)).unwrap();
    assert_eq!(summary.found, 4);
    assert_eq!(summary.decoded, 3);
    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.failures[0].ordinal, 2);

    let tree = summarize(&tmp.path().join("out.npt")).unwrap();
    assert_eq!(tree.batch_sizes, vec![2, 1]);
}

#[test]
fn exact_multiple_has_no_trailing_batch() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("six.xyz");
    fs::write(&input, WATER.repeat(6)).unwrap();

    pack_xyz(options(tmp.path(), &input, 3)).unwrap();
    let tree = summarize(&tmp.path().join("out.npt")).unwrap();
    assert_eq!(tree.batch_sizes, vec![3, 3]);
    assert_eq!(tree.drop_last, Some(false));
}

#[test]
fn gzip_input_with_mirror_in_parallel() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("set.extxyz.gz");
    let mut enc = GzEncoder::new(File::create(&input).unwrap(), Compression::default());
    enc.write_all(format!("{WATER}{METHANE_FRAGMENT}{WATER}").as_bytes())
        .unwrap();
    enc.finish().unwrap();

    let mirror = tmp.path().join("set.sqlite");
    let opts = PackOptions {
        mirror: Some(mirror.clone()),
        parallel_sinks: true,
        workers: Some(2),
        ..options(tmp.path(), &input, 2)
    };
    let summary = pack_xyz(opts).unwrap();
    assert_eq!(summary.written, 3);
    assert_eq!(summary.mirrored, Some(3));

    let records = load_mirror(&mirror).unwrap();
    let keys: Vec<u64> = records.iter().map(|(k, _)| *k).collect();
    assert_eq!(keys, vec![0, 1, 2]);
    assert_eq!(records[1].1.formula(), "CH2");
    let config = read_config(&tmp.path().join("out.npt"), 0, 1).unwrap();
    assert_eq!(config.positions, records[1].1.positions());
}

#[test]
fn existing_output_is_kept_without_overwrite() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("one.xyz");
    fs::write(&input, WATER).unwrap();
    pack_xyz(options(tmp.path(), &input, 50)).unwrap();

    assert!(pack_xyz(options(tmp.path(), &input, 50)).is_err());
    let again = PackOptions {
        overwrite: true,
        ..options(tmp.path(), &input, 50)
    };
    assert_eq!(pack_xyz(again).unwrap().written, 1);
}
