mod common;

use common::{FEEDBACK_DOC, doc, loaded, pipeline};
use effect_forge::error::PassError;
use effect_forge::pass::{InputKind, InputSource, PassInput, PassType, Sampler};
use effect_forge::pipeline::{MAX_PASSES, StructureViolation};
use effect_forge::pool::SlotRef;

fn buffer_pass(id: &str) -> String {
    format!(
        r#"{{ "type": "buffer", "code": "void mainImage(out vec4 c, in vec2 p) {{ c = vec4(1.0); }}",
             "outputs": [ {{ "channel": 0, "id": "{id}" }} ] }}"#
    )
}

fn effect(passes: &[String]) -> String {
    format!(r#"{{ "ver": "0.1", "renderpass": [ {} ] }}"#, passes.join(","))
}

fn image_pass() -> String {
    r#"{ "type": "image", "code": "void mainImage(out vec4 c, in vec2 p) { c = vec4(1.0); }" }"#.to_string()
}

#[test]
fn added_buffers_take_free_slots_in_order() {
    let (mut pipeline, compiler) = pipeline();
    assert_eq!(pipeline.add_pass(PassType::Image, "").unwrap(), 0);
    for (i, name) in ["Buffer A", "Buffer B", "Buffer C", "Buffer D"].iter().enumerate() {
        let id = pipeline.add_pass(PassType::Buffer, "").unwrap();
        let pass = pipeline.pass(id).unwrap();
        assert_eq!(pass.name(), *name);
        assert_eq!(pass.output_slot(), Some(SlotRef::Buffer(i)));
        assert!(pass.runnable_program().is_some(), "added passes compile immediately");
        assert!(pipeline.pool().slot(SlotRef::Buffer(i)).unwrap().is_allocated());
    }
    assert_eq!(compiler.calls(), 5);
    assert!(matches!(
        pipeline.add_pass(PassType::Buffer, ""),
        Err(PassError::NoFreeBufferSlot)
    ));
    assert_eq!(pipeline.passes().len(), 5);
}

#[test]
fn killed_buffer_frees_its_slot_for_reuse() {
    let (mut pipeline, _) = pipeline();
    pipeline.add_pass(PassType::Image, "").unwrap();
    let a = pipeline.add_pass(PassType::Buffer, "").unwrap();
    pipeline.add_pass(PassType::Buffer, "").unwrap();
    let textures = pipeline.backend().live_textures();

    pipeline.kill_pass(a).unwrap();
    assert!(!pipeline.pool().slot(SlotRef::Buffer(0)).unwrap().is_allocated());
    assert_eq!(pipeline.backend().live_textures(), textures - 2);

    let id = pipeline.add_pass(PassType::Buffer, "Trails").unwrap();
    let pass = pipeline.pass(id).unwrap();
    assert_eq!(pass.output_slot(), Some(SlotRef::Buffer(0)));
    assert_eq!(pass.name(), "Trails");
}

#[test]
fn shared_slot_survives_killing_one_writer() {
    let json = effect(&[buffer_pass("4dXGR8"), buffer_pass("4dXGR8"), image_pass()]);
    let (mut pipeline, _) = loaded(&json);
    pipeline.kill_pass(0).unwrap();
    assert!(pipeline.pool().slot(SlotRef::Buffer(0)).unwrap().is_allocated());
    pipeline.kill_pass(0).unwrap();
    assert!(!pipeline.pool().slot(SlotRef::Buffer(0)).unwrap().is_allocated());
}

#[test]
fn cubemap_and_pass_limits() {
    let (mut pipeline, _) = pipeline();
    pipeline.add_pass(PassType::Cubemap, "").unwrap();
    assert_eq!(pipeline.pass(0).unwrap().name(), "Cube A");
    assert!(matches!(
        pipeline.add_pass(PassType::Cubemap, ""),
        Err(PassError::CubemapSlotInUse)
    ));

    for pass_type in [PassType::Image, PassType::Common, PassType::Sound] {
        pipeline.add_pass(pass_type, "").unwrap();
    }
    for _ in 0..4 {
        pipeline.add_pass(PassType::Buffer, "").unwrap();
    }
    assert_eq!(pipeline.passes().len(), MAX_PASSES);
    assert!(pipeline.check_correctness());
    assert!(matches!(
        pipeline.add_pass(PassType::Image, ""),
        Err(PassError::TooManyPasses { max: MAX_PASSES })
    ));
}

#[test]
fn kill_renumbers_and_saves_remaining_passes() {
    let json = effect(&[buffer_pass("4dXGR8"), buffer_pass("XsXGR8"), image_pass()]);
    let (mut pipeline, _) = loaded(&json);
    assert!(matches!(pipeline.kill_pass(3), Err(PassError::NoSuchPass(3))));

    pipeline.kill_pass(0).unwrap();
    assert_eq!(pipeline.passes().len(), 2);
    assert_eq!(pipeline.pass(0).unwrap().name(), "Buffer B");
    assert_eq!(pipeline.pass(1).unwrap().pass_type(), PassType::Image);

    let saved = pipeline.save();
    assert_eq!(saved.renderpass.len(), 2);
    assert_eq!(saved.renderpass[0].outputs[0].id, "XsXGR8");
    assert!(saved.flags.unwrap().is_multipass);
}

#[test]
fn structure_checks() {
    let cases = [
        (effect(&[image_pass()]), vec![]),
        (
            effect(&[image_pass(), image_pass()]),
            vec![StructureViolation::ImagePassCount(2)],
        ),
        (
            effect(&[buffer_pass("4dXGR8")]),
            vec![StructureViolation::ImagePassCount(0)],
        ),
        (
            effect(&[
                buffer_pass("4dXGR8"),
                buffer_pass("XsXGR8"),
                buffer_pass("4sXGR8"),
                buffer_pass("XdfGR8"),
                buffer_pass("4dXGR8"),
                image_pass(),
            ]),
            vec![StructureViolation::TooMany {
                pass_type: PassType::Buffer,
                count: 5,
                max: 4,
            }],
        ),
    ];
    for (json, expected) in cases {
        let (mut pipeline, _) = pipeline();
        pipeline.load(&doc(&json)).unwrap();
        assert_eq!(pipeline.structure_violations(), expected, "{json}");
        assert_eq!(pipeline.check_correctness(), expected.is_empty());
    }
}

#[test]
fn input_edits_validate_channels() {
    let (mut pipeline, _) = loaded(FEEDBACK_DOC);
    let input = PassInput {
        kind: InputKind::Keyboard,
        source: InputSource::Asset("4dXGRr".to_string()),
        filepath: String::new(),
        sampler: Sampler::default(),
    };
    assert!(matches!(
        pipeline.set_pass_input(1, 4, Some(input.clone())),
        Err(PassError::NoSuchChannel(4))
    ));
    assert!(matches!(
        pipeline.set_pass_input(7, 0, Some(input.clone())),
        Err(PassError::NoSuchPass(7))
    ));

    pipeline.set_pass_input(1, 3, Some(input)).unwrap();
    assert!(pipeline.compute_flags().uses_keyboard);
    pipeline.set_pass_input(1, 3, None).unwrap();
    assert!(!pipeline.compute_flags().uses_keyboard);
}

#[test]
fn cubemap_alone_is_not_multipass() {
    let cubemap = r#"{ "type": "cubemap", "code": "void mainCubemap(out vec4 c, in vec2 p, in vec3 o, in vec3 d) { c = vec4(d, 1.0); }",
                      "outputs": [ { "channel": 0, "id": "4dX3Rr" } ] }"#
        .to_string();
    let (pipeline, _) = loaded(&effect(&[cubemap, image_pass()]));
    assert!(!pipeline.compute_flags().is_multipass);

    let (pipeline, _) = loaded(&effect(&[buffer_pass("4dXGR8"), image_pass()]));
    assert!(pipeline.compute_flags().is_multipass);
}
