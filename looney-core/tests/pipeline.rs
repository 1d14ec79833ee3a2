use looney_core::{
    AudioBlock, EstimatorKind, Pipeline, PitchEstimate, PitchEstimator, Spectrum, TunerConfig,
    TunerError,
};
use pretty_assertions::assert_eq;

/// Standard guitar tuning, low to high.
const OPEN_STRINGS: [(&str, f32); 6] = [
    ("E2", 82.41),
    ("A2", 110.0),
    ("D3", 146.83),
    ("G3", 196.0),
    ("B3", 246.94),
    ("E4", 329.63),
];

fn detected_names(kind: EstimatorKind) -> Vec<String> {
    let mut config = TunerConfig::default();
    config.estimator.kind = kind;
    let mut pipeline = Pipeline::new(&config);

    OPEN_STRINGS
        .iter()
        .map(|&(_, freq)| {
            let block = AudioBlock::sine(freq, 0.4, config.sample_rate, config.block_size);
            let result = pipeline.analyze(&block).unwrap();
            result.note.map(|n| n.name).unwrap_or_default()
        })
        .collect()
}

#[test]
fn open_strings_are_named_by_both_yin_variants() {
    let expected: Vec<String> = OPEN_STRINGS.iter().map(|(n, _)| n.to_string()).collect();
    assert_eq!(detected_names(EstimatorKind::Yin), expected);
    assert_eq!(detected_names(EstimatorKind::FastYin), expected);
}

#[test]
fn open_strings_are_in_tune() {
    let config = TunerConfig::default();
    let mut pipeline = Pipeline::new(&config);
    for &(name, freq) in &OPEN_STRINGS {
        let block = AudioBlock::sine(freq, 0.4, config.sample_rate, config.block_size);
        let note = pipeline.analyze(&block).unwrap().note.unwrap();
        assert!(note.is_in_tune(5.0), "{}: {:+.2} cents", name, note.cents);
    }
}

#[test]
fn short_blocks_do_not_misread_low_e() {
    // 1024 samples hold less than two periods of E2, so nothing is reported.
    let config = TunerConfig {
        block_size: 1024,
        ..TunerConfig::default()
    };
    let mut pipeline = Pipeline::new(&config);
    let block = AudioBlock::sine(82.41, 0.4, config.sample_rate, config.block_size);

    let result = pipeline.analyze(&block).unwrap();
    assert_eq!(result.pitch, PitchEstimate::NoPitch);
    assert!(result.note.is_none());
}

#[test]
fn reference_pitch_shifts_the_scale() {
    let config = TunerConfig {
        reference_pitch: 432.0,
        ..TunerConfig::default()
    };
    let mut pipeline = Pipeline::new(&config);

    let block = AudioBlock::sine(432.0, 0.5, config.sample_rate, config.block_size);
    let note = pipeline.analyze(&block).unwrap().note.unwrap();
    assert_eq!(note.name, "A4");
    assert!(note.cents.abs() < 2.0, "cents = {}", note.cents);

    // 440 Hz is about 32 cents sharp against A = 432.
    let block = AudioBlock::sine(440.0, 0.5, config.sample_rate, config.block_size);
    let note = pipeline.analyze(&block).unwrap().note.unwrap();
    assert_eq!(note.name, "A4");
    assert!((note.cents - 31.8).abs() < 2.0, "cents = {}", note.cents);
}

#[test]
fn integer_pcm_blocks_are_accepted() {
    let config = TunerConfig::default();
    let mut pipeline = Pipeline::new(&config);
    let pcm: Vec<i16> = AudioBlock::sine(196.0, 0.5, config.sample_rate, config.block_size)
        .samples()
        .iter()
        .map(|&s| (s * 32767.0) as i16)
        .collect();

    let result = pipeline
        .analyze(&AudioBlock::from_i16(&pcm, config.sample_rate))
        .unwrap();
    assert_eq!(result.note.unwrap().name, "G3");
}

#[test]
fn rate_mismatch_is_reported_with_both_formats() {
    let config = TunerConfig::default();
    let mut pipeline = Pipeline::new(&config);
    let block = AudioBlock::sine(110.0, 0.5, 48000, config.block_size);

    match pipeline.analyze(&block) {
        Err(TunerError::MalformedBlock { expected, found }) => {
            assert_eq!(expected, "2048 samples at 44100 Hz");
            assert_eq!(found, "2048 samples at 48000 Hz");
        }
        other => panic!("expected a malformed block error, got {:?}", other),
    }
}

/// Reports the loudest spectral bin, but only once it clears a level.
struct LoudestBin {
    min_magnitude: f32,
}

impl PitchEstimator for LoudestBin {
    fn name(&self) -> &'static str {
        "loudest-bin"
    }

    fn estimate(&mut self, _block: &AudioBlock, spectrum: &Spectrum) -> PitchEstimate {
        match spectrum.peak() {
            Some(bin) if bin.magnitude >= self.min_magnitude => PitchEstimate::Detected {
                frequency: bin.frequency,
                confidence: 1.0,
            },
            _ => PitchEstimate::NoPitch,
        }
    }
}

#[test]
fn custom_estimators_plug_into_the_pipeline() {
    let config = TunerConfig::default();
    let mut pipeline =
        Pipeline::new(&config).with_estimator(Box::new(LoudestBin { min_magnitude: 50.0 }));
    assert_eq!(pipeline.estimator_name(), "loudest-bin");

    let loud = AudioBlock::sine(329.63, 0.5, config.sample_rate, config.block_size);
    let note = pipeline.analyze(&loud).unwrap().note.unwrap();
    assert_eq!(note.name, "E4");

    let quiet = AudioBlock::sine(329.63, 0.001, config.sample_rate, config.block_size);
    assert_eq!(pipeline.analyze(&quiet).unwrap().pitch, PitchEstimate::NoPitch);
}
