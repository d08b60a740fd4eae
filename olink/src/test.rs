use byteorder::ByteOrder;
use matches::assert_matches;
use util::Endian;

use crate::{link_objects, Error, LinkOptions, LinkOutput, Result};

fn link_with(inputs: &[(&str, &str)], options: &LinkOptions) -> Result<LinkOutput> {
    let inputs: Vec<(String, Vec<u8>)> = inputs
        .iter()
        .map(|(name, text)| (name.to_string(), text.as_bytes().to_vec()))
        .collect();
    link_objects(&inputs, options, "out.oe")
}

fn link_one(text: &str) -> Result<LinkOutput> {
    link_with(&[("test.oo", text)], &LinkOptions::default())
}

fn image(text: &str) -> Vec<u8> {
    link_one(text).unwrap().image
}

fn word_at(image: &[u8], address: usize) -> u32 {
    Endian::read_u32(&image[address..address + 4])
}

// Without optimization every image ends with the synthesized (empty)
// constructor and destructor tables: two zero terminator words.
const TABLES: usize = 8;

#[test]
fn single_symbol_payload() {
    let image = image("=main\n70 80 01 02\n7F 00 00 00\n");
    assert_eq!(&image[..8], &[0x70, 0x80, 0x01, 0x02, 0x7F, 0x00, 0x00, 0x00]);
    assert_eq!(image.len(), 8 + TABLES);
}

#[test]
fn symbols_are_word_aligned() {
    // `a` is a single byte; `b` must start on the next word boundary.
    let image = image("=a\nAA\n=b\nBB\n");
    assert_eq!(&image[..8], &[0xAA, 0, 0, 0, 0xBB, 0, 0, 0]);
}

#[test]
fn absolute_high_low_invocations() {
    // main is 4 + 2 + 2 bytes, so b lands at address 8.
    let image = image("=main\n^b >b <b\n=b\n7F 00 00 00\n");
    assert_eq!(word_at(&image, 0), 8);
    assert_eq!(&image[4..6], &[8, 0]); // low half
    assert_eq!(&image[6..8], &[0, 0]); // high half
    assert_eq!(image[8], 0x7F);
}

#[test]
fn relative_invocations_count_words_from_reference_end() {
    // The reference at bytes 2..4 of main targets the label at offset 8;
    // (8 - 4) >> 2 == 1.
    let forward = image("=main\n7E 00 &skip\n70 80 00 00\n:skip\n7F 00 00 00\n");
    assert_eq!(&forward[2..4], &[1, 0]);
    // A backward reference producing a negative offset.
    let backward = image("=main\n:top\n70 80 00 00\n7E 00 &top\n");
    assert_eq!(&backward[6..8], &[0xFE, 0xFF]); // -2 words
}

#[test]
fn relative_invocation_to_another_symbol() {
    let image = image("=main\n7E 00 &next\n=next\n7F 00 00 00\n");
    // Offset from the end of the reference (4) to next (4) is zero words.
    assert_eq!(&image[2..4], &[0, 0]);
}

#[test]
fn relative_invocation_out_of_bounds() {
    let filler = "00 ".repeat(0x20000);
    let text = format!("=main\n7E 00 &far\n=filler\n{}\n=far\n7F 00 00 00\n", filler);
    let err = link_one(&text).unwrap_err();
    assert_matches!(err, Error::Link { ref message, .. }
        if message == "Relative invocation out of bounds.");
}

#[test]
fn relative_invocation_misaligned() {
    let err = link_one("=main\n7E 00 &x\n=b\n00 :x 00\n").unwrap_err();
    assert_matches!(err, Error::Link { ref message, .. }
        if message == "Relative invocation is misaligned.");
}

#[test]
fn duplicate_global_symbol() {
    let err = link_with(
        &[("a.oo", "=foo\n00\n"), ("b.oo", "=foo\n00\n")],
        &LinkOptions::default(),
    )
    .unwrap_err();
    assert_matches!(err, Error::Link { ref message, .. }
        if message == "Duplicate global symbol: foo");
}

#[test]
fn duplicate_static_symbol_in_one_file() {
    let err = link_one("@foo\n00\n@foo\n00\n").unwrap_err();
    assert_matches!(err, Error::Link { ref message, .. }
        if message == "Duplicate static symbol: foo");
}

#[test]
fn statics_shadow_globals_within_their_file() {
    let output = link_with(
        &[
            ("a.oo", "=main\n^foo\n@foo\nBB\n"),
            ("b.oo", "=foo\nCC\n"),
        ],
        &LinkOptions::default(),
    )
    .unwrap();
    // main@0 (4 bytes), static foo@4, global foo@8; the reference in a.oo
    // resolves to the static.
    assert_eq!(word_at(&output.image, 0), 4);
    assert_eq!(output.image[4], 0xBB);
    assert_eq!(output.image[8], 0xCC);
}

#[test]
fn statics_do_not_collide_across_files() {
    let output = link_with(
        &[("a.oo", "@foo\nAA\n"), ("b.oo", "@foo\nBB\n")],
        &LinkOptions::default(),
    );
    assert!(output.is_ok());
}

#[test]
fn duplicate_label_definition() {
    let err = link_one("=main\n:x 00 :x\n").unwrap_err();
    assert_matches!(err, Error::Link { ref message, .. }
        if message == "Duplicate label definition");
}

#[test]
fn undefined_reference() {
    let err = link_one("=main\n^missing\n").unwrap_err();
    assert_matches!(err, Error::Link { ref message, .. }
        if message == "Definition not found: missing");
}

#[test]
fn bytes_outside_a_symbol() {
    let err = link_one("AA BB\n").unwrap_err();
    assert_matches!(err, Error::Link { ref message, .. }
        if message == "Bytes cannot appear outside of a symbol.");
}

#[test]
fn optimization_removes_unreachable_symbols() {
    let options = LinkOptions {
        optimize: true,
        debug: false,
    };
    // Only `a`, the entry point, survives.
    let output = link_with(&[("t.oo", "=a\n7F 00 00 00\n=b\n7F 00 00 00\n")], &options).unwrap();
    assert_eq!(output.image, vec![0x7F, 0x00, 0x00, 0x00]);
}

#[test]
fn optimization_follows_references() {
    let options = LinkOptions {
        optimize: true,
        debug: false,
    };
    let output = link_with(
        &[("t.oo", "=a\n^b\n=b\n7F 00 00 00\n=c\n00\n")],
        &options,
    )
    .unwrap();
    // a keeps b alive; c is gone, so the image is exactly 8 bytes.
    assert_eq!(output.image.len(), 8);
    assert_eq!(word_at(&output.image, 0), 4);
}

#[test]
fn optimization_keeps_constructors_and_destructors() {
    let options = LinkOptions {
        optimize: true,
        debug: false,
    };
    let output = link_with(
        &[("t.oo", "=a\n7F 00 00 00\n={ctor\nAA AA AA AA\n=}dtor\nBB BB BB BB\n")],
        &options,
    )
    .unwrap();
    // Both flagged symbols survive even though nothing references them.
    assert_eq!(output.image.len(), 12);
}

#[test]
fn label_references_keep_their_symbol_alive() {
    let options = LinkOptions {
        optimize: true,
        debug: false,
    };
    let output = link_with(
        &[("t.oo", "=a\n^inner\n=b\n00 00 00 00 :inner 7F 00 00 00\n=c\n00\n")],
        &options,
    )
    .unwrap();
    // The label reference keeps b; inner sits at b@4 + 4.
    assert_eq!(output.image.len(), 12);
    assert_eq!(word_at(&output.image, 0), 8);
}

#[test]
fn constructor_tables_are_synthesized() {
    let image = image(
        "=main\n7F 00 00 00\n={5}first\nAA AA AA AA\n={1}second\nBB BB BB BB\n=}fini\nCC CC CC CC\n",
    );
    // Layout: main@0, first@4, second@8, fini@12, __constructors@16
    // (3 words), __destructors@28 (2 words).
    assert_eq!(image.len(), 36);
    // Constructors by rising priority: second (1), then first (5).
    assert_eq!(word_at(&image, 16), 8);
    assert_eq!(word_at(&image, 20), 4);
    assert_eq!(word_at(&image, 24), 0);
    // Destructors: just fini, then the terminator.
    assert_eq!(word_at(&image, 28), 12);
    assert_eq!(word_at(&image, 32), 0);
}

#[test]
fn unprioritized_constructors_run_last() {
    let image = image("=main\n7F 00 00 00\n={late\nAA AA AA AA\n={3}early\nBB BB BB BB\n");
    // main@0, late@4, early@8; table: early (3) before late (none).
    assert_eq!(word_at(&image, 12), 8);
    assert_eq!(word_at(&image, 16), 4);
    assert_eq!(word_at(&image, 20), 0);
}

#[test]
fn constructor_table_is_addressable() {
    let image = image("=main\n^__constructors\n");
    // main@0 is 4 bytes; the table follows it.
    assert_eq!(word_at(&image, 0), 4);
}

#[test]
fn archives_link_member_by_member() {
    let archive = "=main\n^helper\n7F 00 00 00\n\
                   %one.oo\n=helper\nAA 00 00 00\n\
                   %two.oo\n@priv\nBB 00 00 00\n=user\n^priv\n";
    let output = link_with(&[("lib.oa", archive)], &LinkOptions::default()).unwrap();
    // main@0 (8), helper@8, priv@12, user@16.
    assert_eq!(word_at(&output.image, 0), 8);
    assert_eq!(output.image[8], 0xAA);
    assert_eq!(output.image[12], 0xBB);
    assert_eq!(word_at(&output.image, 16), 12);
}

#[test]
fn labels_do_not_cross_archive_members() {
    let archive = "=main\n00 00 00 00 :local\n\
                   %one.oo\n=other\n7E 00 &local\n";
    let err = link_with(&[("lib.oa", archive)], &LinkOptions::default()).unwrap_err();
    assert_matches!(err, Error::Link { ref message, .. }
        if message == "Definition not found: local");
}

#[test]
fn debug_sidecar_tracks_lines_and_symbols() {
    let options = LinkOptions {
        optimize: false,
        debug: true,
    };
    let output = link_with(
        &[("t.oo", "#line 5 \"src.os\"\n=main\nAA BB\nCC DD\n7F 00 00 00\n")],
        &options,
    )
    .unwrap();
    assert_eq!(
        output.debug.unwrap(),
        "; Onramp debug info for: out.oe\n\
         #symbol main\n\
         #line 6 \"src.os\"\n\
         2\n\
         #\n\
         2\n\
         #\n\
         4\n\
         #line 0 \"<builtin>\"\n\
         #symbol __constructors\n\
         4\n\
         #symbol __destructors\n\
         4\n"
    );
}

#[test]
fn no_debug_stream_without_the_option() {
    assert!(link_one("=main\n00\n").unwrap().debug.is_none());
}

// End-to-end: assemble with oasm, link, execute on the VM.

fn run_image(image: &[u8]) -> (ovm::Vm, u32) {
    use ovm::RegisterId;

    const BASE: u32 = 0x1000;
    const MEMORY: u32 = 0x10000;

    let mut vm = ovm::Vm::new(MEMORY);
    vm.memory
        .slice_mut(BASE, image.len() as u32)
        .unwrap()
        .copy_from_slice(image);
    vm.set_register(RegisterId::R0, 4);
    vm.set_register(RegisterId::RSP, MEMORY);
    vm.set_register(RegisterId::RFP, MEMORY);
    vm.set_register(RegisterId::RPP, BASE);
    vm.set_register(RegisterId::RIP, BASE);
    let code = vm.run().unwrap();
    (vm, code)
}

fn assemble_and_link(source: &str) -> Vec<u8> {
    let object = oasm::assemble(source, "test.os").unwrap();
    link_objects(
        &[("test.oo".to_string(), object)],
        &LinkOptions::default(),
        "out.oe",
    )
    .unwrap()
    .image
}

#[test]
fn pipeline_add_and_halt() {
    let image = assemble_and_link("=__start\nadd r0 1 2\nsys halt '00 '00\n");
    let (_, code) = run_image(&image);
    assert_eq!(code, 3);
}

#[test]
fn pipeline_loop_with_labels() {
    let source = "=__start\n\
                  zero r0\n\
                  mov r1 5\n\
                  :loop\n\
                  add r0 r0 r1\n\
                  dec r1\n\
                  jnz r1 &loop\n\
                  sys halt '00 '00\n";
    let image = assemble_and_link(source);
    let (_, code) = run_image(&image);
    assert_eq!(code, 15); // 5 + 4 + 3 + 2 + 1
}

#[test]
fn pipeline_loads_data_through_a_symbol() {
    let source = "=__start\n\
                  imw r1 ^message\n\
                  ldb r0 rpp r1\n\
                  sys halt '00 '00\n\
                  =message\n\
                  \"Hi\"\n";
    let image = assemble_and_link(source);
    let (_, code) = run_image(&image);
    assert_eq!(code, b'H' as u32);
}

#[test]
fn pipeline_absolute_call_and_return() {
    let source = "=__start\n\
                  call ^five\n\
                  sys halt '00 '00\n\
                  =five\n\
                  mov r0 5\n\
                  ret\n";
    let image = assemble_and_link(source);
    let (_, code) = run_image(&image);
    assert_eq!(code, 5);
}

#[test]
fn pipeline_signed_division() {
    // -14 / 4 truncates toward zero: quotient -3, so -(-3) via mods
    // checks both expansions.
    let source = "=__start\n\
                  imw r1 -14\n\
                  divs r2 r1 4\n\
                  sub r0 0 r2\n\
                  sys halt '00 '00\n";
    let image = assemble_and_link(source);
    let (_, code) = run_image(&image);
    assert_eq!(code, 3);
}
