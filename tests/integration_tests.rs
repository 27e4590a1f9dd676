//! End-to-end tests: WAV tree -> feature files -> train/test split

use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use voxcorpus::dataset::read_samples;
use voxcorpus::{
    CorpusError, CorpusLayout, DatasetAssembler, ExtractionParams, FeatureComputation, FeatureKind,
    FeatureRequest, FeatureRow, LabelPolicy, SplitConfig, WavFile, WavHeader,
};

/// Stands in for the feature scripts: reads the text amplitude file and emits
/// one row per full frame, `feature_count` values wide.
struct FramingComputation {
    /// Drop one frame for this kind to provoke misalignment
    short_kind: Option<FeatureKind>,
}

impl FeatureComputation for FramingComputation {
    fn compute(&self, request: &FeatureRequest) -> voxcorpus::Result<Vec<FeatureRow>> {
        let text = fs::read_to_string(&request.input)?;
        let samples = text.split_whitespace().count() / 2;
        let mut frames = if samples >= request.frame_length {
            (samples - request.frame_length) / request.frame_step + 1
        } else {
            0
        };
        if self.short_kind == Some(request.kind) {
            frames -= 1;
        }
        Ok((0..frames)
            .map(|frame| (0..request.feature_count).map(|i| frame as f64 + i as f64 / 100.0).collect())
            .collect())
    }
}

fn params() -> ExtractionParams {
    ExtractionParams {
        sample_rate: 44100,
        frame_length: 400,
        frame_step: 200,
        mfcc_features: 13,
        fbank_features: 5,
        ..ExtractionParams::default()
    }
}

fn assembler(split: SplitConfig, short_kind: Option<FeatureKind>) -> DatasetAssembler {
    DatasetAssembler::new(
        CorpusLayout::default(),
        params(),
        split,
        Arc::new(FramingComputation { short_kind }),
    )
    .with_workers(3)
}

fn write_with_hound(path: &Path, samples: usize) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 44100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..samples {
        writer.write_sample(((i % 200) as i16 - 100) * 50).unwrap();
    }
    writer.finalize().unwrap();
}

fn write_native(path: &Path, channels: u16, samples: usize) {
    let data: Vec<u8> = (0..samples * channels as usize)
        .flat_map(|i| ((i % 97) as i16).to_le_bytes())
        .collect();
    WavFile::new(WavHeader::pcm16(44100, channels, data.len() as u32), data)
        .unwrap()
        .write(path)
        .unwrap();
}

/// 2000 samples per recording -> (2000 - 400) / 200 + 1 = 9 frames
fn build_wav_tree(root: &Path) {
    let alice = root.join("voice_alice_0");
    let bob = root.join("voice_bob_1");
    let carol = root.join("voice_carol_2");
    let misc = root.join("misc");
    for dir in [&alice, &bob, &carol, &misc] {
        fs::create_dir_all(dir).unwrap();
    }

    for i in 0..3 {
        write_with_hound(&alice.join(format!("a{}.wav", i)), 2000);
        write_native(&bob.join(format!("b{}.wav", i)), 1, 2000);
    }
    write_native(&carol.join("c0.wav"), 1, 2000);
    write_native(&carol.join("c1.wav"), 1, 2000);
    write_native(&carol.join("stereo.wav"), 2, 2000);
    fs::write(carol.join("notes.txt"), "not audio").unwrap();
    write_native(&misc.join("m0.wav"), 1, 2000);
}

#[test]
fn test_hound_written_wav_is_readable() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hound.wav");
    write_with_hound(&path, 10);

    let wav = WavFile::open(&path).unwrap();
    assert!(wav.header().is_supported_format());
    assert_eq!(wav.size_in_bytes(), 20);
    assert_eq!(wav.amplitudes().unwrap()[0], -5000);
}

#[test]
fn test_extract_then_assemble_multiclass() {
    let dir = TempDir::new().unwrap();
    let wav_root = dir.path().join("wav");
    let features_root = dir.path().join("features");
    build_wav_tree(&wav_root);

    let split = SplitConfig {
        train_size: 0.75,
        policy: LabelPolicy::Multiclass,
        seed: Some(11),
    };
    let assembler = assembler(split, None);

    let snapshot = assembler.extract_features(&wav_root, &features_root).unwrap();
    assert_eq!(snapshot.queued, 10);
    assert_eq!(snapshot.written, 8);
    assert_eq!(snapshot.skipped, 2);
    assert_eq!(snapshot.failed, 0);
    assert_eq!(snapshot.frames, 8 * 9);

    assert!(features_root.join("voice_alice_0/a0.features").exists());
    assert!(features_root.join("voice_carol_2/c1.features").exists());
    assert!(!features_root.join("voice_carol_2/stereo.features").exists());
    assert!(!features_root.join("misc").exists(), "unlabelled folders are not mirrored");
    let leftovers = fs::read_dir(features_root.join("voice_bob_1"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map(|x| x != "features").unwrap_or(true))
        .count();
    assert_eq!(leftovers, 0, "scratch files must be cleaned up");

    let save_dir = dir.path().join("models/multiclass");
    let summary = assembler.create_train_test(&features_root, &save_dir).unwrap();
    assert_eq!(summary.feature_len, 18);
    assert_eq!(summary.train_rows, 54);
    assert_eq!(summary.test_rows, 18);
    assert_eq!(summary.class_counts.get(&0), Some(&27));
    assert_eq!(summary.class_counts.get(&2), Some(&18));

    let train = read_samples(save_dir.join("_train.txt")).unwrap();
    let test = read_samples(save_dir.join("_test.txt")).unwrap();
    assert_eq!(train.len() + test.len(), 72);
    assert!(train.iter().chain(test.iter()).all(|s| s.features.len() == 18));
}

#[test]
fn test_extract_then_assemble_one_vs_all() {
    let dir = TempDir::new().unwrap();
    let wav_root = dir.path().join("wav");
    let features_root = dir.path().join("features");
    build_wav_tree(&wav_root);

    let split = SplitConfig {
        train_size: 0.5,
        policy: LabelPolicy::OneVsAll { main_class: 2 },
        seed: Some(5),
    };
    let assembler = assembler(split, None);
    assembler.extract_features(&wav_root, &features_root).unwrap();

    let save_dir = dir.path().join(LabelPolicy::OneVsAll { main_class: 2 }.model_folder_name());
    let summary = assembler.create_train_test(&features_root, &save_dir).unwrap();

    let samples: Vec<_> = read_samples(&summary.train_path)
        .unwrap()
        .into_iter()
        .chain(read_samples(&summary.test_path).unwrap())
        .collect();
    assert_eq!(samples.len(), 72);
    assert_eq!(samples.iter().filter(|s| s.label == 1).count(), 18);
    assert!(samples.iter().all(|s| s.label == 0 || s.label == 1));

    // stored feature files keep the original layout; relabelling is in memory only
    assert!(features_root.join("voice_alice_0").exists());
}

#[test]
fn test_misaligned_extractors_fail_per_file() {
    let dir = TempDir::new().unwrap();
    let wav_root = dir.path().join("wav");
    let features_root = dir.path().join("features");
    build_wav_tree(&wav_root);

    let assembler = assembler(SplitConfig::default(), Some(FeatureKind::Filterbank));
    let snapshot = assembler.extract_features(&wav_root, &features_root).unwrap();

    assert_eq!(snapshot.failed, 8);
    assert_eq!(snapshot.written, 0);
    assert!(!features_root.join("voice_bob_1/b0.features").exists());

    // nothing to assemble, and no output files are left behind
    let save_dir = dir.path().join("out");
    assert!(assembler.create_train_test(&features_root, &save_dir).is_err());
    assert!(!save_dir.join("_train.txt").exists());
}

#[test]
fn test_missing_wav_root_is_fatal() {
    let dir = TempDir::new().unwrap();
    let err = assembler(SplitConfig::default(), None)
        .extract_features(dir.path().join("nope"), dir.path().join("features"))
        .unwrap_err();
    assert!(matches!(err, CorpusError::Io(_)));
}

#[test]
fn test_uncreatable_output_dir_is_fatal() {
    let dir = TempDir::new().unwrap();
    let wav_root = dir.path().join("wav");
    build_wav_tree(&wav_root);
    let features_root = dir.path().join("features");
    fs::write(&features_root, "a regular file, not a directory").unwrap();

    let err = assembler(SplitConfig::default(), None)
        .extract_features(&wav_root, &features_root)
        .unwrap_err();

    assert!(matches!(err, CorpusError::Io(_)));
    assert_eq!(fs::read_to_string(&features_root).unwrap(), "a regular file, not a directory");
}

#[test]
fn test_single_file_extraction() {
    let dir = TempDir::new().unwrap();
    let wav = dir.path().join("recorded.wav");
    write_with_hound(&wav, 2000);
    let output = dir.path().join("recorded.features");

    let snapshot = assembler(SplitConfig::default(), None).extract_file(&wav, &output).unwrap();
    assert_eq!(snapshot.written, 1);
    assert_eq!(fs::read_to_string(&output).unwrap().lines().count(), 9);
}
