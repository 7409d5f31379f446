//! Standalone demo: plays a short acid line through the default audio
//! device, or renders it to a WAV file with `--render <path>`.

use acidsynth::audio::output::AudioOutput;
use acidsynth::{create_engine, EngineController, ParamId};

/// One bar of sixteenth steps: (semitone offset from root, accent, slide).
const PATTERN: [(i32, bool, bool); 16] = [
    (0, true, false),
    (0, false, false),
    (12, false, true),
    (0, false, false),
    (3, true, false),
    (0, false, true),
    (0, false, false),
    (12, false, false),
    (5, false, true),
    (0, false, false),
    (0, true, false),
    (-2, false, false),
    (0, false, true),
    (3, false, false),
    (12, true, true),
    (0, false, false),
];

const ROOT_NOTE: u8 = 36; // C2
const STEP_S: f32 = 0.125; // 120 BPM sixteenths
const BARS: usize = 4;

fn schedule_pattern(controller: &EngineController, sample_rate: f32) {
    let step_samples = (STEP_S * sample_rate) as u64;
    let gate_samples = step_samples / 2;
    let mut voice_id = 0u32;

    for bar in 0..BARS {
        for (step, &(offset, accent, slide)) in PATTERN.iter().enumerate() {
            let at = (bar * PATTERN.len() + step) as u64 * step_samples;
            let pitch = (ROOT_NOTE as i32 + offset).clamp(0, 127) as u8;
            voice_id += 1;
            if let Err(e) =
                controller.note_on(voice_id, pitch, 0.9, accent, slide, false, at)
            {
                eprintln!("dropped step {}: {}", step, e);
                continue;
            }
            let _ = controller.note_off(Some(voice_id), None, at + gate_samples);
        }
    }
}

fn set_demo_patch(controller: &EngineController) {
    let patch = [
        (ParamId::SawLevel, 1.0),
        (ParamId::SubLevel, 0.3),
        (ParamId::LowpassCutoff, 900.0),
        (ParamId::Resonance, 16.0),
        (ParamId::FilterEnvAmount, 0.7),
        (ParamId::Attack, 0.002),
        (ParamId::Decay, 0.18),
        (ParamId::Sustain, 0.0),
        (ParamId::Release, 0.08),
        (ParamId::Glide, 0.3),
        (ParamId::AccentAmount, 0.8),
        (ParamId::MasterGain, 0.8),
    ];
    for (id, value) in patch {
        if let Err(e) = controller.set_parameter_immediate(id, value) {
            eprintln!("patch value rejected: {}", e);
        }
    }
}

fn render_to_wav(path: &str) -> Result<(), String> {
    let sample_rate = 44100.0;
    let (mut engine, controller) = create_engine(sample_rate);
    set_demo_patch(&controller);
    controller
        .set_polyphony_mode(true, 1)
        .map_err(|e| e.to_string())?;
    schedule_pattern(&controller, sample_rate);

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: sample_rate as u32,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer =
        hound::WavWriter::create(path, spec).map_err(|e| format!("wav create: {}", e))?;

    let total = (BARS * PATTERN.len()) as u64 * (STEP_S * sample_rate) as u64
        + (sample_rate as u64);
    let mut t = 0u64;
    let mut left = [0.0f32; 512];
    let mut right = [0.0f32; 512];
    while t < total {
        let n = ((total - t) as usize).min(512);
        engine.render(&mut left[..n], &mut right[..n], t);
        for i in 0..n {
            writer
                .write_sample(left[i].clamp(-1.0, 1.0))
                .and_then(|_| writer.write_sample(right[i].clamp(-1.0, 1.0)))
                .map_err(|e| format!("wav write: {}", e))?;
        }
        t += n as u64;
    }
    writer.finalize().map_err(|e| format!("wav finalize: {}", e))?;
    println!("rendered {} samples to {}", total, path);
    Ok(())
}

fn play_live() -> Result<(), String> {
    let sample_rate = AudioOutput::preferred_sample_rate()?;
    let (engine, controller) = create_engine(sample_rate);
    set_demo_patch(&controller);
    controller
        .set_polyphony_mode(true, 1)
        .map_err(|e| e.to_string())?;

    let _output = AudioOutput::new(engine)?;
    schedule_pattern(&controller, sample_rate);

    let seconds = BARS as f32 * PATTERN.len() as f32 * STEP_S + 1.0;
    println!("playing {} bars at {} Hz...", BARS, sample_rate);
    std::thread::sleep(std::time::Duration::from_secs_f32(seconds));

    controller.all_notes_off().map_err(|e| e.to_string())?;
    std::thread::sleep(std::time::Duration::from_millis(100));
    Ok(())
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let result = match args.get(1).map(String::as_str) {
        Some("--render") => match args.get(2) {
            Some(path) => render_to_wav(path),
            None => Err("usage: acidsynth --render <out.wav>".to_string()),
        },
        Some(other) => Err(format!("unknown argument: {}", other)),
        None => play_live(),
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
