//! Image output and the debug sidecar.

use byteorder::ByteOrder;
use util::Endian;

/// Collects output bytes and, when enabled, the `.od` debug stream.
///
/// The debug stream is driven by state changes: bytes accumulate against
/// the current (file, line, symbol) and a decimal count line is flushed
/// whenever any of them moves. A plain line increment within the same
/// file is abbreviated to a bare `#`.
pub struct Emitter {
    out: Vec<u8>,
    debug: Option<DebugInfo>,
}

struct DebugInfo {
    text: String,
    filename: Option<String>,
    line: u32,
    symbol: Option<String>,
    bytes_emitted: u32,
}

impl DebugInfo {
    fn flush_count(&mut self) {
        if self.bytes_emitted > 0 {
            self.text.push_str(&self.bytes_emitted.to_string());
            self.text.push('\n');
            self.bytes_emitted = 0;
        }
    }
}

impl Emitter {
    pub fn new(debug: bool, target: &str) -> Emitter {
        Emitter {
            out: Vec::new(),
            debug: if debug {
                Some(DebugInfo {
                    text: format!("; Onramp debug info for: {}\n", target),
                    filename: None,
                    line: 1,
                    symbol: None,
                    bytes_emitted: 0,
                })
            } else {
                None
            },
        }
    }

    /// Bytes emitted so far; symbol addresses are file offsets.
    pub fn position(&self) -> u32 {
        self.out.len() as u32
    }

    /// Pads with zero bytes up to `address` (the next symbol's start).
    pub fn pad_to(&mut self, address: u32) {
        while self.position() < address {
            self.byte(0);
        }
    }

    pub fn byte(&mut self, byte: u8) {
        self.out.push(byte);
        if let Some(debug) = &mut self.debug {
            debug.bytes_emitted += 1;
        }
    }

    pub fn short(&mut self, value: u16) {
        let mut buf = [0u8; 2];
        Endian::write_u16(&mut buf, value);
        self.byte(buf[0]);
        self.byte(buf[1]);
    }

    pub fn word(&mut self, value: u32) {
        let mut buf = [0u8; 4];
        Endian::write_u32(&mut buf, value);
        for &byte in &buf {
            self.byte(byte);
        }
    }

    /// Declares the source location of the bytes that follow.
    pub fn set_location(&mut self, filename: &str, line: u32) {
        let debug = match &mut self.debug {
            Some(debug) => debug,
            None => return,
        };

        let same_file = debug.filename.as_deref() == Some(filename);
        if same_file && line == debug.line {
            return;
        }

        debug.flush_count();
        if same_file && line == debug.line + 1 {
            debug.text.push_str("#\n");
        } else {
            debug
                .text
                .push_str(&format!("#line {} \"{}\"\n", line, filename));
            if !same_file {
                debug.filename = Some(filename.to_owned());
            }
        }
        debug.line = line;
    }

    /// Declares the symbol the bytes that follow belong to.
    pub fn set_symbol(&mut self, name: &str) {
        let debug = match &mut self.debug {
            Some(debug) => debug,
            None => return,
        };
        if debug.symbol.as_deref() == Some(name) {
            return;
        }
        debug.flush_count();
        debug.symbol = Some(name.to_owned());
        debug.text.push_str(&format!("#symbol {}\n", name));
    }

    pub fn finish(mut self) -> (Vec<u8>, Option<String>) {
        if let Some(debug) = &mut self.debug {
            debug.flush_count();
        }
        (self.out, self.debug.map(|debug| debug.text))
    }
}
