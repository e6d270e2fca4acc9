//! TSPL command encoder.
//!
//! Commands are ASCII lines `NAME arg1,arg2` terminated by CRLF. The one
//! exception is `BITMAP`, whose header is followed directly by raw packed
//! rows with the CRLF appended after the payload.

use image_processor::Bitmap;

use crate::options::{CopyStrategy, MediaMode, PrintJobSpec};
use crate::responses::StatusKind;
use crate::{LabelPrinterError, Result};

pub const CRLF: &[u8] = b"\r\n";

/// Role of a segment inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Size,
    /// `GAP` or `BLINE`.
    Media,
    Direction,
    Density,
    Clear,
    Bitmap,
    Print,
    Query,
    Control,
    Raw,
}

/// Fixed order of a print job. `false` marks an optional slot.
const PRINT_JOB_ORDER: [(CommandKind, bool); 7] = [
    (CommandKind::Size, true),
    (CommandKind::Media, true),
    (CommandKind::Direction, true),
    (CommandKind::Density, false),
    (CommandKind::Clear, true),
    (CommandKind::Bitmap, true),
    (CommandKind::Print, true),
];

/// One piece of a command frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Text command; CRLF is added on encode.
    Line { kind: CommandKind, text: String },
    /// ASCII header, raw payload, then CRLF.
    Binary {
        kind: CommandKind,
        header: String,
        payload: Vec<u8>,
    },
    /// Bytes sent verbatim.
    Raw(Vec<u8>),
}

impl Segment {
    pub fn line(kind: CommandKind, text: impl Into<String>) -> Self {
        Segment::Line {
            kind,
            text: text.into(),
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Segment::Line { kind, .. } | Segment::Binary { kind, .. } => *kind,
            Segment::Raw(_) => CommandKind::Raw,
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            Segment::Line { text, .. } => text.len() + CRLF.len(),
            Segment::Binary {
                header, payload, ..
            } => header.len() + payload.len() + CRLF.len(),
            Segment::Raw(bytes) => bytes.len(),
        }
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            Segment::Line { text, .. } => {
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(CRLF);
            }
            Segment::Binary {
                header, payload, ..
            } => {
                out.extend_from_slice(header.as_bytes());
                out.extend_from_slice(payload);
                out.extend_from_slice(CRLF);
            }
            Segment::Raw(bytes) => out.extend_from_slice(bytes),
        }
    }
}

/// What a frame is for; selects the validation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    PrintJob,
    Query,
    Control,
    /// Diagnostic pass-through, not order-checked.
    Raw,
}

/// An ordered list of segments forming one logical operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    kind: FrameKind,
    segments: Vec<Segment>,
}

impl CommandFrame {
    pub fn new(kind: FrameKind, segments: Vec<Segment>) -> Self {
        Self { kind, segments }
    }

    /// Frame carrying arbitrary bytes.
    pub fn raw(bytes: Vec<u8>) -> Self {
        Self::new(FrameKind::Raw, vec![Segment::Raw(bytes)])
    }

    /// Raw frame from a hex string; whitespace is ignored.
    pub fn from_hex(input: &str) -> Result<Self> {
        let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = hex::decode(&compact)
            .map_err(|e| LabelPrinterError::InvalidJob(format!("invalid hex: {e}")))?;
        if bytes.is_empty() {
            return Err(LabelPrinterError::InvalidJob("empty raw command".into()));
        }
        Ok(Self::raw(bytes))
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn kinds(&self) -> Vec<CommandKind> {
        self.segments.iter().map(Segment::kind).collect()
    }

    /// Check the frame before anything is written.
    pub fn validate(&self) -> Result<()> {
        if self.segments.is_empty() {
            return Err(LabelPrinterError::InvalidJob("frame has no segments".into()));
        }
        for segment in &self.segments {
            match segment {
                Segment::Binary { payload, .. } if payload.is_empty() => {
                    return Err(LabelPrinterError::InvalidJob(
                        "binary segment with empty payload".into(),
                    ));
                }
                Segment::Raw(bytes) if bytes.is_empty() => {
                    return Err(LabelPrinterError::InvalidJob("empty raw segment".into()));
                }
                // A CR or LF here would end the command early on the wire.
                Segment::Line { text, .. } | Segment::Binary { header: text, .. }
                    if text.chars().any(char::is_control) =>
                {
                    return Err(LabelPrinterError::InvalidJob(format!(
                        "control character in command {text:?}"
                    )));
                }
                _ => {}
            }
        }

        match self.kind {
            FrameKind::PrintJob => validate_print_job(&self.segments),
            FrameKind::Query => match self.kinds().as_slice() {
                [CommandKind::Query] => Ok(()),
                other => Err(LabelPrinterError::InvalidJob(format!(
                    "query frame must hold exactly one query, got {other:?}"
                ))),
            },
            FrameKind::Control => {
                if self.kinds().iter().all(|&k| k == CommandKind::Control) {
                    Ok(())
                } else {
                    Err(LabelPrinterError::InvalidJob(
                        "control frame holds non-control segments".into(),
                    ))
                }
            }
            FrameKind::Raw => Ok(()),
        }
    }

    /// Concatenated wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let len = self.segments.iter().map(Segment::encoded_len).sum();
        let mut out = Vec::with_capacity(len);
        for segment in &self.segments {
            segment.write_to(&mut out);
        }
        out
    }
}

fn validate_print_job(segments: &[Segment]) -> Result<()> {
    let mut slot = 0;
    for segment in segments {
        let kind = segment.kind();
        loop {
            let Some(&(expected, required)) = PRINT_JOB_ORDER.get(slot) else {
                return Err(LabelPrinterError::InvalidJob(format!(
                    "{kind:?} after the final PRINT"
                )));
            };
            slot += 1;
            if expected == kind {
                break;
            }
            if required {
                return Err(LabelPrinterError::InvalidJob(format!(
                    "{kind:?} where {expected:?} was expected"
                )));
            }
        }
    }

    match PRINT_JOB_ORDER[slot..].iter().find(|(_, required)| *required) {
        Some((missing, _)) => Err(LabelPrinterError::InvalidJob(format!(
            "print job is missing {missing:?}"
        ))),
        None => Ok(()),
    }
}

fn mm(value: f32) -> String {
    format!("{value:.1} mm")
}

fn media_line(media: &MediaMode) -> Segment {
    let text = match *media {
        MediaMode::Gap { gap_mm, offset_mm } => format!("GAP {},{}", mm(gap_mm), mm(offset_mm)),
        MediaMode::BlackMark {
            height_mm,
            offset_mm,
        } => format!("BLINE {},{}", mm(height_mm), mm(offset_mm)),
        MediaMode::Continuous => format!("GAP {},{}", mm(0.0), mm(0.0)),
    };
    Segment::line(CommandKind::Media, text)
}

/// Encode one label: SIZE, GAP/BLINE, DIRECTION, [DENSITY], CLS, BITMAP, PRINT.
///
/// With [`CopyStrategy::Resend`] the frame prints one label and the caller
/// sends it once per copy; with [`CopyStrategy::DeviceCount`] it ends in
/// `PRINT n`.
pub fn encode_print_job(spec: &PrintJobSpec, bitmap: &Bitmap) -> Result<CommandFrame> {
    spec.validate()?;
    if bitmap.is_empty() {
        return Err(LabelPrinterError::InvalidJob("bitmap has no rows".into()));
    }

    let mut segments = vec![
        Segment::line(
            CommandKind::Size,
            format!("SIZE {},{}", mm(spec.label.width_mm), mm(spec.label.height_mm)),
        ),
        media_line(&spec.media),
        Segment::line(
            CommandKind::Direction,
            format!("DIRECTION {},{}", spec.direction as u8, u8::from(spec.mirror)),
        ),
    ];
    if let Some(level) = spec.density {
        segments.push(Segment::line(CommandKind::Density, format!("DENSITY {level}")));
    }
    segments.push(Segment::line(CommandKind::Clear, "CLS"));
    segments.push(Segment::Binary {
        kind: CommandKind::Bitmap,
        header: format!(
            "BITMAP {},{},{},{},{},",
            spec.x,
            spec.y,
            bitmap.bytes_per_row(),
            bitmap.height(),
            spec.bitmap_mode as u8
        ),
        payload: bitmap.data().to_vec(),
    });
    let count = match spec.copy_strategy {
        CopyStrategy::Resend => 1,
        CopyStrategy::DeviceCount => spec.copies,
    };
    segments.push(Segment::line(CommandKind::Print, format!("PRINT {count}")));

    let frame = CommandFrame::new(FrameKind::PrintJob, segments);
    frame.validate()?;
    Ok(frame)
}

/// Parameterless status query.
pub fn query(kind: StatusKind) -> CommandFrame {
    let literal = match kind {
        StatusKind::Config => "CONFIG?",
        StatusKind::Battery => "BATTERY?",
        StatusKind::ChunkSize => "GETCHUNKSIZE",
        StatusKind::PrintedCount => "GETPRINTEDCOUNT",
    };
    CommandFrame::new(FrameKind::Query, vec![Segment::line(CommandKind::Query, literal)])
}

fn control(text: String) -> CommandFrame {
    CommandFrame::new(
        FrameKind::Control,
        vec![Segment::line(CommandKind::Control, text)],
    )
}

/// Reset the printer's buffer and state.
pub fn initialize() -> CommandFrame {
    control("INITIALPRINTER".into())
}

pub fn self_test() -> CommandFrame {
    control("SELFTEST".into())
}

/// Advance to the start of the next label.
pub fn form_feed() -> CommandFrame {
    control("FORMFEED".into())
}

/// Feed `dots` dot lines.
pub fn feed(dots: u32) -> CommandFrame {
    control(format!("FEED {dots}"))
}

/// Beep at `level` for `interval`.
pub fn sound(level: u8, interval: u16) -> CommandFrame {
    control(format!("SOUND {level},{interval}"))
}
