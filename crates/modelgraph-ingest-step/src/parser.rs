//! STEP File Parser
//!
//! Parser for ISO 10303-21 physical files (the encoding used by IFC models).
//! Handles simple and complex entity instances, typed parameters, nested
//! lists, `/* comments */` and the string control directives.

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_while, take_while1},
    character::complete::{char, digit1, multispace0, one_of},
    combinator::{map, map_res, opt, recognize, value},
    multi::{many0, many1, separated_list0},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use std::borrow::Cow;

// ============================================================================
// STEP Data Types
// ============================================================================

/// A complete STEP file
#[derive(Debug, Clone)]
pub struct StepFile {
    pub header: StepHeader,
    pub data: Vec<StepEntity>,
}

/// STEP file header section
#[derive(Debug, Clone, Default)]
pub struct StepHeader {
    pub file_description: Vec<String>,
    pub file_name: String,
    pub file_schema: Vec<String>,
}

/// A STEP entity instance.
///
/// Complex instances (`#5=(A(..)B(..));`) keep every partial type name in
/// `type_names` and their parameters concatenated in `attributes`.
#[derive(Debug, Clone, PartialEq)]
pub struct StepEntity {
    pub id: u64,
    pub type_names: Vec<String>,
    pub attributes: Vec<StepValue>,
}

impl StepEntity {
    pub fn type_name(&self) -> String {
        self.type_names.join("+")
    }

    pub fn is_complex(&self) -> bool {
        self.type_names.len() > 1
    }
}

/// STEP attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum StepValue {
    /// `$`
    Null,
    /// `*`
    Derived,
    Integer(i64),
    Real(f64),
    String(String),
    Enum(String),
    /// `"0FF"`, kept as the hex text.
    Binary(String),
    Reference(u64),
    List(Vec<StepValue>),
    TypedValue(String, Box<StepValue>),
}

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("not an ISO-10303-21 file (missing `ISO-10303-21;` marker)")]
    NotStep,
    #[error("missing {0} section")]
    MissingSection(&'static str),
    #[error("syntax error at line {line}, column {column} near `{near}`")]
    Syntax {
        line: usize,
        column: usize,
        near: String,
    },
}

// ============================================================================
// Entry point
// ============================================================================

/// Parse a complete STEP file.
pub fn parse_step(input: &str) -> Result<StepFile, StepError> {
    let text = strip_comments(input);
    let text = text.as_ref();
    let syntax = |rest: &str| syntax_error(text, rest);

    let rest = text.trim_start_matches('\u{feff}').trim_start();
    let Some(rest) = rest.strip_prefix("ISO-10303-21;") else {
        return Err(StepError::NotStep);
    };

    let (rest, _) = ws(rest).map_err(|_| syntax(rest))?;
    let Ok((mut rest, header_records)) = parse_header(rest) else {
        return Err(if rest.starts_with("HEADER;") {
            syntax(rest)
        } else {
            StepError::MissingSection("HEADER")
        });
    };
    let header = header_from_records(header_records);

    let mut data = Vec::new();
    let mut sections = 0usize;
    loop {
        let (r, _) = ws(rest).map_err(|_| syntax(rest))?;
        rest = r;
        if rest.starts_with("END-ISO-10303-21;") || rest.is_empty() {
            break;
        }
        let (r, _) = data_open(rest).map_err(|_| syntax(rest))?;
        rest = r;
        sections += 1;

        loop {
            let (r, _) = ws(rest).map_err(|_| syntax(rest))?;
            rest = r;
            if let Some(r) = rest.strip_prefix("ENDSEC;") {
                rest = r;
                break;
            }
            let (r, entity) = parse_entity(rest).map_err(|_| syntax(rest))?;
            data.push(entity);
            rest = r;
        }
    }

    if sections == 0 {
        return Err(StepError::MissingSection("DATA"));
    }

    Ok(StepFile { header, data })
}

fn syntax_error(full: &str, rest: &str) -> StepError {
    let offset = full.len() - rest.len();
    let consumed = &full[..offset];
    let line = consumed.matches('\n').count() + 1;
    let column = offset - consumed.rfind('\n').map(|i| i + 1).unwrap_or(0) + 1;
    let near: String = rest.chars().take(40).collect();
    StepError::Syntax {
        line,
        column,
        near: near.trim_end().to_string(),
    }
}

/// Replace `/* ... */` outside of strings with whitespace, keeping newlines
/// so error positions still match the input text.
fn strip_comments(input: &str) -> Cow<'_, str> {
    if !input.contains("/*") {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    while let Some(c) = chars.next() {
        if in_string {
            if c == '\'' {
                in_string = false;
            }
            out.push(c);
            continue;
        }
        match c {
            '\'' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

// ============================================================================
// Sections
// ============================================================================

fn ws(input: &str) -> IResult<&str, &str> {
    multispace0(input)
}

/// Parse header section into its raw records.
fn parse_header(input: &str) -> IResult<&str, Vec<(String, Vec<StepValue>)>> {
    let (input, _) = tag("HEADER;")(input)?;
    let (input, records) = many0(preceded(ws, header_record))(input)?;
    let (input, _) = preceded(ws, tag("ENDSEC;"))(input)?;
    Ok((input, records))
}

fn header_record(input: &str) -> IResult<&str, (String, Vec<StepValue>)> {
    let (input, name) = parse_identifier(input)?;
    let (input, args) = preceded(ws, parse_arguments)(input)?;
    let (input, _) = preceded(ws, char(';'))(input)?;
    Ok((input, (name.to_string(), args)))
}

fn header_from_records(records: Vec<(String, Vec<StepValue>)>) -> StepHeader {
    let mut header = StepHeader::default();
    for (name, args) in records {
        match name.as_str() {
            "FILE_DESCRIPTION" => header.file_description = strings_of(args.first()),
            "FILE_NAME" => {
                if let Some(StepValue::String(s)) = args.first() {
                    header.file_name = s.clone();
                }
            }
            "FILE_SCHEMA" => header.file_schema = strings_of(args.first()),
            _ => {}
        }
    }
    header
}

fn strings_of(value: Option<&StepValue>) -> Vec<String> {
    match value {
        Some(StepValue::List(items)) => items
            .iter()
            .filter_map(|v| match v {
                StepValue::String(s) => Some(s.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// `DATA;` or the parameterised `DATA('name',('SCHEMA'));` form.
fn data_open(input: &str) -> IResult<&str, ()> {
    let (input, _) = tag("DATA")(input)?;
    let (input, _) = opt(preceded(ws, parse_arguments))(input)?;
    let (input, _) = preceded(ws, char(';'))(input)?;
    Ok((input, ()))
}

// ============================================================================
// Entity instances
// ============================================================================

/// Parse a single entity
fn parse_entity(input: &str) -> IResult<&str, StepEntity> {
    let (input, id) = parse_reference(input)?;
    let (input, _) = tuple((ws, char('='), ws))(input)?;
    let (input, parts) = alt((
        map(simple_record, |part| vec![part]),
        complex_record,
    ))(input)?;
    let (input, _) = preceded(ws, char(';'))(input)?;

    let mut type_names = Vec::with_capacity(parts.len());
    let mut attributes = Vec::new();
    for (name, args) in parts {
        type_names.push(name);
        attributes.extend(args);
    }
    Ok((
        input,
        StepEntity {
            id,
            type_names,
            attributes,
        },
    ))
}

fn simple_record(input: &str) -> IResult<&str, (String, Vec<StepValue>)> {
    let (input, name) = parse_identifier(input)?;
    let (input, args) = preceded(ws, parse_arguments)(input)?;
    Ok((input, (name.to_ascii_uppercase(), args)))
}

fn complex_record(input: &str) -> IResult<&str, Vec<(String, Vec<StepValue>)>> {
    delimited(
        char('('),
        many1(preceded(ws, simple_record)),
        preceded(ws, char(')')),
    )(input)
}

/// Parse an identifier (user-defined keywords carry a leading `!`).
fn parse_identifier(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        opt(char('!')),
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    )))(input)
}

/// Deepest list/typed-parameter nesting accepted inside one record.
pub const MAX_NESTING: usize = 32;

/// `( value, value, ... )`
fn parse_arguments(input: &str) -> IResult<&str, Vec<StepValue>> {
    arguments_at(input, 0)
}

fn arguments_at(input: &str, depth: usize) -> IResult<&str, Vec<StepValue>> {
    if depth > MAX_NESTING {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::TooLarge,
        )));
    }
    delimited(
        terminated(char('('), ws),
        separated_list0(delimited(ws, char(','), ws), |i| value_at(i, depth)),
        preceded(ws, char(')')),
    )(input)
}

/// Parse a STEP value
#[cfg(test)]
fn parse_value(input: &str) -> IResult<&str, StepValue> {
    value_at(input, 0)
}

fn value_at(input: &str, depth: usize) -> IResult<&str, StepValue> {
    alt((
        value(StepValue::Null, char('$')),
        value(StepValue::Derived, char('*')),
        map(parse_reference, StepValue::Reference),
        map(parse_step_string, StepValue::String),
        map(parse_binary, StepValue::Binary),
        map(parse_enum, StepValue::Enum),
        map(|i| arguments_at(i, depth + 1), StepValue::List),
        |i| typed_at(i, depth),
        parse_number,
    ))(input)
}

/// Parse a reference #123
fn parse_reference(input: &str) -> IResult<&str, u64> {
    preceded(char('#'), map_res(digit1, str::parse))(input)
}

/// Parse a STEP string 'text' (`''` is an escaped quote).
fn parse_step_string(input: &str) -> IResult<&str, String> {
    let (input, raw) = delimited(
        char('\''),
        many0(alt((value("'", tag("''")), is_not("'")))),
        char('\''),
    )(input)?;
    Ok((input, decode_string(&raw.concat())))
}

/// Parse a binary literal "0FF"
fn parse_binary(input: &str) -> IResult<&str, String> {
    map(
        delimited(char('"'), take_while(|c: char| c.is_ascii_hexdigit()), char('"')),
        str::to_string,
    )(input)
}

/// Parse an enum .VALUE.
fn parse_enum(input: &str) -> IResult<&str, String> {
    map(
        delimited(
            char('.'),
            take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_'),
            char('.'),
        ),
        str::to_string,
    )(input)
}

/// Parse a typed parameter IFCLABEL('x')
fn typed_at(input: &str, depth: usize) -> IResult<&str, StepValue> {
    let (input, name) = parse_identifier(input)?;
    let (input, mut args) = preceded(ws, |i| arguments_at(i, depth + 1))(input)?;
    let inner = if args.len() == 1 {
        args.remove(0)
    } else {
        StepValue::List(args)
    };
    Ok((
        input,
        StepValue::TypedValue(name.to_ascii_uppercase(), Box::new(inner)),
    ))
}

/// Parse an integer or real (`12`, `-3`, `0.`, `1.5E-3`).
fn parse_number(input: &str) -> IResult<&str, StepValue> {
    let (input, text) = recognize(tuple((
        opt(one_of("+-")),
        digit1,
        opt(pair(
            char('.'),
            pair(
                take_while(|c: char| c.is_ascii_digit()),
                opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
            ),
        )),
    )))(input)?;

    let number = if text.contains('.') {
        text.parse::<f64>().ok().map(StepValue::Real)
    } else {
        text.parse::<i64>()
            .ok()
            .map(StepValue::Integer)
            .or_else(|| text.parse::<f64>().ok().map(StepValue::Real))
    };
    match number {
        Some(v) => Ok((input, v)),
        None => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Float,
        ))),
    }
}

// ============================================================================
// String control directives
// ============================================================================

/// Decode `\\`, `\S\c`, `\X\hh`, `\X2\hhhh..\X0\` and `\X4\hhhhhhhh..\X0\`.
/// Page (`\P?\`) directives are dropped. Malformed directives are kept
/// verbatim.
pub fn decode_string(raw: &str) -> String {
    if !raw.contains('\\') {
        return raw.to_string();
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find('\\') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];

        if let Some(r) = rest.strip_prefix("\\\\") {
            out.push('\\');
            rest = r;
        } else if let Some(r) = rest.strip_prefix("\\X2\\") {
            match decode_wide(r, 4) {
                Some((s, r)) => {
                    out.push_str(&s);
                    rest = r;
                }
                None => {
                    out.push_str("\\X2\\");
                    rest = r;
                }
            }
        } else if let Some(r) = rest.strip_prefix("\\X4\\") {
            match decode_wide(r, 8) {
                Some((s, r)) => {
                    out.push_str(&s);
                    rest = r;
                }
                None => {
                    out.push_str("\\X4\\");
                    rest = r;
                }
            }
        } else if let Some(r) = rest.strip_prefix("\\X\\") {
            match r.get(..2).and_then(|h| u8::from_str_radix(h, 16).ok()) {
                Some(b) => {
                    out.push(char::from(b));
                    rest = &r[2..];
                }
                None => {
                    out.push_str("\\X\\");
                    rest = r;
                }
            }
        } else if let Some(r) = rest.strip_prefix("\\S\\") {
            let mut it = r.chars();
            match it.next() {
                Some(c) if c.is_ascii() => {
                    out.push(char::from(c as u8 + 128));
                    rest = it.as_str();
                }
                _ => {
                    out.push_str("\\S\\");
                    rest = r;
                }
            }
        } else if rest.starts_with("\\P") && rest.as_bytes().get(3) == Some(&b'\\') {
            rest = &rest[4..];
        } else {
            out.push('\\');
            rest = &rest[1..];
        }
    }
    out.push_str(rest);
    out
}

/// Hex code units up to `\X0\`; `width` is 4 (UTF-16) or 8 (UTF-32).
fn decode_wide(input: &str, width: usize) -> Option<(String, &str)> {
    let end = input.find("\\X0\\")?;
    let hex = &input[..end];
    if !hex.is_ascii() || hex.len() % width != 0 {
        return None;
    }

    let decoded = if width == 4 {
        let units: Option<Vec<u16>> = (0..hex.len())
            .step_by(4)
            .map(|i| u16::from_str_radix(&hex[i..i + 4], 16).ok())
            .collect();
        String::from_utf16(&units?).ok()?
    } else {
        (0..hex.len())
            .step_by(8)
            .map(|i| {
                u32::from_str_radix(&hex[i..i + 8], 16)
                    .ok()
                    .and_then(char::from_u32)
            })
            .collect::<Option<String>>()?
    };
    Some((decoded, &input[end + 4..]))
}

// ============================================================================
// Tests
// ============================================================================
