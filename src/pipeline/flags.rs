//! Derived capability flags and structural checks over a pass list.

use thiserror::Error;

use super::Pipeline;
use crate::backend::GraphicsBackend;
use crate::document::EffectFlags;
use crate::pass::{InputKind, Pass, PassType};
use crate::pool::MAX_BUFFERS;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructureViolation {
    #[error("expected exactly one image pass, found {0}")]
    ImagePassCount(usize),
    #[error("at most {max} {} passes allowed, found {count}", .pass_type.as_str())]
    TooMany { pass_type: PassType, count: usize, max: usize },
}

/// Upper bound on passes of one type in a well-formed effect.
pub fn max_passes_of(pass_type: PassType) -> usize {
    match pass_type {
        PassType::Buffer => MAX_BUFFERS,
        PassType::Common | PassType::Cubemap | PassType::Image | PassType::Sound => 1,
    }
}

pub(crate) fn structure_violations(passes: &[Pass]) -> Vec<StructureViolation> {
    let count = |t: PassType| passes.iter().filter(|p| p.pass_type() == t).count();
    let mut violations = Vec::new();

    let images = count(PassType::Image);
    if images != 1 {
        violations.push(StructureViolation::ImagePassCount(images));
    }
    for pass_type in [PassType::Common, PassType::Sound, PassType::Cubemap, PassType::Buffer] {
        let found = count(pass_type);
        let max = max_passes_of(pass_type);
        if found > max {
            violations.push(StructureViolation::TooMany { pass_type, count: found, max });
        }
    }
    violations
}

pub(crate) fn compute_flags(passes: &[Pass]) -> EffectFlags {
    let mut flags = EffectFlags::default();
    for pass in passes {
        match pass.pass_type() {
            PassType::Sound => flags.has_sound_output = true,
            PassType::Buffer => flags.is_multipass = true,
            PassType::Cubemap | PassType::Common | PassType::Image => {}
        }
        for input in pass.inputs().iter().flatten() {
            match input.kind {
                InputKind::Keyboard => flags.uses_keyboard = true,
                InputKind::Webcam => flags.uses_webcam = true,
                InputKind::Mic => flags.uses_mic = true,
                InputKind::MusicStream => flags.uses_music_stream = true,
                _ => {}
            }
        }
        // Stereo entry point.
        if pass.pass_type() == PassType::Image && pass.source().contains("mainVR") {
            flags.uses_vr = true;
        }
    }
    flags
}

impl<B: GraphicsBackend> Pipeline<B> {
    pub fn compute_flags(&self) -> EffectFlags {
        compute_flags(&self.passes)
    }

    pub fn structure_violations(&self) -> Vec<StructureViolation> {
        structure_violations(&self.passes)
    }

    /// Whether the pass list has exactly one image pass and respects the
    /// per-type limits.
    pub fn check_correctness(&self) -> bool {
        self.structure_violations().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::{InputSource, PassInput, PassKey, Sampler};

    fn pass(pass_type: PassType) -> Pass {
        Pass::new(PassKey(0), pass_type, "", "")
    }

    #[test]
    fn full_house_is_valid() {
        let mut passes = vec![
            pass(PassType::Common),
            pass(PassType::Sound),
            pass(PassType::Cubemap),
            pass(PassType::Image),
        ];
        passes.extend((0..MAX_BUFFERS).map(|_| pass(PassType::Buffer)));
        assert!(structure_violations(&passes).is_empty());
    }

    #[test]
    fn reports_each_violation() {
        let passes = vec![pass(PassType::Sound), pass(PassType::Sound)];
        assert_eq!(
            structure_violations(&passes),
            vec![
                StructureViolation::ImagePassCount(0),
                StructureViolation::TooMany {
                    pass_type: PassType::Sound,
                    count: 2,
                    max: 1
                },
            ]
        );
    }

    #[test]
    fn flags_follow_inputs() {
        let mut image = pass(PassType::Image);
        image.set_input(
            2,
            Some(PassInput {
                kind: InputKind::Keyboard,
                source: InputSource::Asset("4dXGRr".into()),
                filepath: String::new(),
                sampler: Sampler::default(),
            }),
        );
        let flags = compute_flags(&[image, pass(PassType::Buffer)]);
        assert!(flags.uses_keyboard);
        assert!(flags.is_multipass);
        assert!(!flags.has_sound_output);
        assert!(!flags.uses_mic);
    }
}
