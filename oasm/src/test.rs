use pest::iterators::Pair;
use pest::Parser;

use crate::parser::{OasmParser, Rule};

pub fn parse_rule(rule: Rule, input: &str) -> Pair<Rule> {
    OasmParser::parse(rule, input).unwrap().next().unwrap()
}

fn assemble(source: &str) -> String {
    String::from_utf8(crate::assemble(source, "test.os").unwrap()).unwrap()
}

/// Assembles one line and strips the leading line directive and final
/// newline, leaving just the emitted tokens.
fn body(source: &str) -> String {
    let text = assemble(source);
    let rest = text
        .strip_prefix("#line 1 \"test.os\"\n")
        .expect("output starts with a line directive");
    rest.trim_end_matches('\n').to_owned()
}

fn error(source: &str) -> String {
    format!("{}", crate::assemble(source, "test.os").unwrap_err())
}

#[test]
fn primitive_instructions() {
    assert_eq!(body("add r0 1 2"), "70800102");
    assert_eq!(body("sub rsp rsp 4"), "718C8C04");
    assert_eq!(body("mul r1 r2 r3"), "72818283");
    assert_eq!(body("divu r1 r2 10"), "7381820A");
    assert_eq!(body("and r0 r0 1"), "74808001");
    assert_eq!(body("or r0 r0 1"), "75808001");
    assert_eq!(body("xor r0 r0 -1"), "768080FF");
    assert_eq!(body("ror r0 r1 4"), "77808104");
    assert_eq!(body("ldw r0 rpp r1"), "78808E81");
    assert_eq!(body("ldb r0 0 r1"), "7A800081");
    assert_eq!(body("cmpu r0 r1 r2"), "7D808182");
    assert_eq!(body("stw 'FF 0 0"), "79FF0000");
    assert_eq!(body("stb r1 r2 3"), "7B818203");
}

#[test]
fn quoted_registers_and_negative_mixes() {
    assert_eq!(body("add '8C '8C -4"), "708C8CFC");
    assert_eq!(body("add r0 0 -112"), "70800090");
}

#[test]
fn zero_inc_dec_mov_not() {
    assert_eq!(body("zero r0"), "70800000");
    assert_eq!(body("inc r1"), "70818101");
    assert_eq!(body("dec r2"), "71828201");
    assert_eq!(body("mov r1 r2"), "70810082");
    assert_eq!(body("not r0 r1"), "7180FF81");
}

#[test]
fn stack_shorthands() {
    assert_eq!(body("push r0"), "718C8C0479808C00");
    assert_eq!(body("pop r0"), "78808C00708C8C04");
    assert_eq!(body("popd"), "708C8C04");
    assert_eq!(body("enter"), "718C8C04798D008C708D8C00");
    assert_eq!(body("leave"), "708C8D00788D008C708C8C04");
    assert_eq!(body("ret"), "788F008C");
    assert_eq!(body("call &f"), "718C8C04708B8F08798B008C7E00&f 708C8C04");
}

#[test]
fn rotates_and_shifts() {
    assert_eq!(body("rol r0 r1 r2"), "718A20827780818A");
    assert_eq!(body("shru r0 r1 r2"), "778B0182718B8B01778A818274808A8B");
    assert_eq!(
        body("shl r0 r1 r2"),
        "718A2082778B018A718B8B01768B8BFF778A818A74808A8B"
    );
    assert_eq!(
        body("shrs r0 r1 r2"),
        "778B0182718B8B01778A0101748A8A817E8A0400778A8182718BFF8B75808A8B7E000200778A818274808A8B"
    );
}

#[test]
fn signed_division() {
    assert_eq!(
        body("divs r0 r1 r2"),
        concat!(
            "718C8C08",
            "778A811F748A8A01798A8C00",
            "7E8A0200718A00817E000100708A8100",
            "778B821F748B8B01798B8C04",
            "7E8B0200718B00827E000100708B8200",
            "73808A8B",
            "788A8C00788B8C04708C8C08708A8A8B748A8A01",
            "7E8A010071800080",
        )
    );
    assert_eq!(
        body("mods r0 r1 r2"),
        concat!(
            "718C8C04",
            "778A811F748A8A01798A8C00",
            "7E8A0200718A00817E000100708A8100",
            "778B821F748B8B01",
            "7E8B0200718B00827E000100708B8200",
            "73808A8B728B808B71808A8B",
            "788A8C00708C8C047E8A010071800080",
        )
    );
    assert_eq!(body("modu r0 r1 r2"), "738A8182728B8A827180818B");
}

#[test]
fn division_rejects_scratch_operands() {
    assert!(crate::assemble("divs r0 ra r1", "t").is_err());
    assert!(crate::assemble("mods r0 r1 rb", "t").is_err());
    assert!(crate::assemble("divs rsp r1 r2", "t").is_err());
    assert!(crate::assemble("modu ra r1 r2", "t").is_err());
}

#[test]
fn cmps_biases_both_operands() {
    assert_eq!(body("cmps r0 r1 r2"), "778B0101708A818B708B828B7D808A8B");
}

#[test]
fn ims_forms() {
    assert_eq!(body("ims r0 0x1234"), "7C803412");
    assert_eq!(body("ims r0 -1"), "7C80FFFF");
    assert_eq!(body("ims r0 <foo"), "7C80<foo ");
    assert_eq!(body("ims r0 >foo"), "7C80>foo ");
    assert_eq!(body("ims r0 &foo"), "7C80&foo ");
    assert_eq!(body("ims r0 'AB 'CD"), "7C80ABCD");
    assert_eq!(body("ims r0 \"h\" \"i\""), "7C806869");
    assert!(crate::assemble("ims r0 ^foo", "t").is_err());
    assert!(crate::assemble("ims r0 0x10000", "t").is_err());
}

#[test]
fn imw_forms() {
    // High half first: ims shifts the accumulated value left 16.
    assert_eq!(body("imw r0 0x12345678"), "7C8034127C807856");
    assert_eq!(body("imw r0 1"), "7C8000007C800100");
    assert_eq!(body("imw r0 -1"), "7C80FFFF7C80FFFF");
    assert_eq!(body("imw r0 ^foo"), "7C80<foo 7C80>foo ");
    assert_eq!(body("imw r0 &foo"), "708000007C80&foo ");
    assert_eq!(body("imw r1 'DD 'CC 'BB 'AA"), "7C81BBAA7C81DDCC");
    assert!(error("imw rip 1").contains("cannot be rip"));
    assert!(crate::assemble("imw rip ^foo", "t").is_err());
    assert!(crate::assemble("imw r0 <foo", "t").is_err());
}

#[test]
fn jumps_relative() {
    assert_eq!(body("jz 0 &l"), "7E00&l ");
    assert_eq!(body("jz r0 &l"), "7E80&l ");
    assert_eq!(body("jz 0 -1"), "7E00FFFF");
    assert_eq!(body("jz 0 '12 '34"), "7E001234");
    assert_eq!(body("jnz r0 &l"), "7E8001007E00&l ");
    assert_eq!(body("je r0 &l"), "7E80&l ");
    assert_eq!(body("jne r0 &l"), "7E8001007E00&l ");
    assert_eq!(body("jmp &l"), "7E00&l ");
    assert_eq!(body("jmp 2"), "7E000200");
}

#[test]
fn jumps_absolute() {
    assert_eq!(body("jmp ^f"), "7C8A<f 7C8A>f 708F8E8A");
    assert_eq!(body("jz 0 ^f"), "7C8A<f 7C8A>f 7E0001007E000100708F8E8A");
    assert_eq!(body("jnz r0 ^f"), "7C8A<f 7C8A>f 7E800100708F8E8A");
    assert_eq!(
        body("call ^f"),
        "7C8A<f 7C8A>f 718C8C04708B8F08798B008C708F8E8A708C8C04"
    );
    assert!(crate::assemble("jz ra ^f", "t").is_err());
}

#[test]
fn comparison_jumps() {
    assert_eq!(body("jg r0 &l"), "7D8B80017E8B&l ");
    assert_eq!(body("jl r0 &l"), "7D8B80FF7E8B&l ");
    assert_eq!(body("jge r0 &l"), "7D8B80FF7E8B01007E00&l ");
    assert_eq!(body("jle r0 &l"), "7D8B80017E8B01007E00&l ");
    assert_eq!(body("jg r0 ^f"), "7C8A<f 7C8A>f 7D8B80017E8B01007E000100708F8E8A");
    assert_eq!(body("jge r0 ^f"), "7C8A<f 7C8A>f 7D8B80FF7E8B0100708F8E8A");
    assert!(crate::assemble("jg ra &l", "t").is_err());
}

#[test]
fn sys_instructions() {
    assert_eq!(body("sys halt '00 '00"), "7F000000");
    assert_eq!(body("sys fwrite '00 '00"), "7F060000");
    assert_eq!(body("sys rmdir '00 '00"), "7F130000");
    assert_eq!(body("sys 9 '00 '00"), "7F090000");
    assert_eq!(body("sys '0A '00 '00"), "7F0A0000");
    assert!(crate::assemble("sys frobnicate '00 '00", "t").is_err());
    assert!(crate::assemble("sys halt '01 '00", "t").is_err());
}

#[test]
fn data_items() {
    assert_eq!(body("'7F"), "7F");
    assert_eq!(body("\"AB\""), "4142");
    assert_eq!(body("1"), "01000000");
    assert_eq!(body("-1"), "FFFFFFFF");
    assert_eq!(body("0x12345678"), "78563412");
    assert_eq!(body("=main 'AA"), "=main AA");
    assert_eq!(body("^main"), "^main ");
    assert_eq!(body(":loop"), ":loop ");
    assert_eq!(body("=?{init 00 00 00 00"), "=?{init 00000000");
}

#[test]
fn alignment_is_enforced() {
    assert!(error("'00 add r0 0 0").contains("Misaligned instruction"));
    assert!(error("=f 'AA 'BB add r0 0 0").contains("Misaligned instruction"));
    // A symbol definition resets alignment, and half invocations count
    // for two bytes.
    assert!(crate::assemble("'00 =f add r0 0 0", "t").is_ok());
    assert!(crate::assemble("=f <a >b add r0 0 0", "t").is_ok());
    assert!(crate::assemble("=f 'AA 'BB 'CC 'DD add r0 0 0", "t").is_ok());
}

#[test]
fn unknown_mnemonics_are_rejected() {
    assert!(crate::assemble("frob r0 r1 r2", "t").is_err());
    assert!(crate::assemble("addx r0 1 2", "t").is_err());
}

#[test]
fn output_mirrors_line_structure() {
    assert_eq!(
        assemble("zero r0\n\nzero r1\n"),
        "#line 1 \"test.os\"\n70800000\n\n70810000\n"
    );
    // An instruction with operands across lines starts on its first line.
    assert_eq!(
        assemble("add r0\n1 2\nzero r1"),
        "#line 1 \"test.os\"\n70800102\n\n70810000\n"
    );
}

#[test]
fn debug_lines_pass_through() {
    assert_eq!(
        assemble("# hand written\nzero r0"),
        "#line 1 \"test.os\"\n# hand written\n70800000\n"
    );
    assert_eq!(
        assemble("#line 7 \"orig.c\"\nzero r0"),
        "#line 1 \"test.os\"\n#line 7 \"orig.c\"\n70800000\n"
    );
}

#[test]
fn comments_are_ignored() {
    assert_eq!(body("add r0 1 2 ; trailing comment"), "70800102");
    assert_eq!(
        assemble("; full line\nzero r0"),
        "#line 1 \"test.os\"\n\n70800000\n"
    );
}
