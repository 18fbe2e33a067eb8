//! builtin functions
//!
//! These functions see plain data: the caller strips nested source ranges from the arguments and marks the
//! result as a whole, so reordering builtins like `reverse` or `sort` decide the order of their output.
use super::FuncError;
use crate::marks::{MarkedValue, ValueKind};
use base64::Engine;
use indexmap::IndexMap;

type Args = Vec<MarkedValue>;
type Result = std::result::Result<MarkedValue, FuncError>;

fn arity(name: &str, args: &[MarkedValue], expected: usize) -> std::result::Result<(), FuncError> {
    if args.len() != expected {
        return Err(FuncError::Arity {
            name: name.to_string(),
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

fn at_least(name: &str, args: &[MarkedValue], expected: usize) -> std::result::Result<(), FuncError> {
    if args.len() < expected {
        return Err(FuncError::Arity {
            name: name.to_string(),
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

fn string<'v>(name: &'static str, value: &'v MarkedValue) -> std::result::Result<&'v str, FuncError> {
    value.as_str().ok_or(FuncError::Type {
        name,
        expected: "string",
        got: value.type_name(),
    })
}

fn list<'v>(
    name: &'static str,
    value: &'v MarkedValue,
) -> std::result::Result<&'v [MarkedValue], FuncError> {
    value.as_array().ok_or(FuncError::Type {
        name,
        expected: "list",
        got: value.type_name(),
    })
}

fn object<'v>(
    name: &'static str,
    value: &'v MarkedValue,
) -> std::result::Result<&'v IndexMap<String, MarkedValue>, FuncError> {
    value.as_object().ok_or(FuncError::Type {
        name,
        expected: "object",
        got: value.type_name(),
    })
}

fn float(name: &'static str, value: &MarkedValue) -> std::result::Result<f64, FuncError> {
    value
        .as_number()
        .and_then(hcl::Number::as_f64)
        .ok_or(FuncError::Type {
            name,
            expected: "number",
            got: value.type_name(),
        })
}

fn integer(name: &'static str, value: &MarkedValue) -> std::result::Result<i64, FuncError> {
    let number = float(name, value)?;
    if number.fract() != 0.0 {
        return Err(FuncError::Message(format!(
            "{name}: expected a whole number, got {number}"
        )));
    }
    Ok(number as i64)
}

fn boolean(name: &'static str, value: &MarkedValue) -> std::result::Result<bool, FuncError> {
    value.as_bool().ok_or(FuncError::Type {
        name,
        expected: "bool",
        got: value.type_name(),
    })
}

/// Integers stay integers, everything else becomes a decimal
fn number(value: f64) -> Result {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        return Ok(MarkedValue::from(value as i64));
    }

    hcl::Number::from_f64(value)
        .map(MarkedValue::from)
        .ok_or_else(|| FuncError::Message(format!("{value} is not a valid number")))
}

fn strings(items: impl IntoIterator<Item = String>) -> MarkedValue {
    MarkedValue::array(items.into_iter().map(MarkedValue::from).collect())
}

/// Equality ignoring marks
fn same(a: &MarkedValue, b: &MarkedValue) -> bool {
    a.to_hcl() == b.to_hcl()
}

pub fn length(args: Args) -> Result {
    arity("length", &args, 1)?;
    let count = match &args[0].kind {
        ValueKind::String(string) => string.chars().count(),
        ValueKind::Array(items) => items.len(),
        ValueKind::Object(entries) => entries.len(),
        _ => {
            return Err(FuncError::Type {
                name: "length",
                expected: "string, list or object",
                got: args[0].type_name(),
            })
        }
    };
    Ok(MarkedValue::from(count as i64))
}

pub fn keys(args: Args) -> Result {
    arity("keys", &args, 1)?;
    let mut keys: Vec<String> = object("keys", &args[0])?.keys().cloned().collect();
    keys.sort();
    Ok(strings(keys))
}

pub fn values(args: Args) -> Result {
    arity("values", &args, 1)?;
    let entries = object("values", &args[0])?;
    let mut keys: Vec<&String> = entries.keys().collect();
    keys.sort();
    Ok(MarkedValue::array(
        keys.into_iter().map(|key| entries[key].clone()).collect(),
    ))
}

pub fn flatten(args: Args) -> Result {
    fn flatten_into(items: &[MarkedValue], out: &mut Vec<MarkedValue>) {
        for item in items {
            match item.as_array() {
                Some(nested) => flatten_into(nested, out),
                None => out.push(item.clone()),
            }
        }
    }

    arity("flatten", &args, 1)?;
    let mut out = vec![];
    flatten_into(list("flatten", &args[0])?, &mut out);
    Ok(MarkedValue::array(out))
}

pub fn contains(args: Args) -> Result {
    arity("contains", &args, 2)?;
    let found = list("contains", &args[0])?
        .iter()
        .any(|item| same(item, &args[1]));
    Ok(MarkedValue::from(found))
}

pub fn index(args: Args) -> Result {
    arity("index", &args, 2)?;
    list("index", &args[0])?
        .iter()
        .position(|item| same(item, &args[1]))
        .map(|position| MarkedValue::from(position as i64))
        .ok_or_else(|| FuncError::Message("index: item not found".to_string()))
}

pub fn lookup(args: Args) -> Result {
    if !(2..=3).contains(&args.len()) {
        return Err(FuncError::Arity {
            name: "lookup".to_string(),
            expected: 2,
            got: args.len(),
        });
    }

    let key = string("lookup", &args[1])?;
    match (object("lookup", &args[0])?.get(key), args.get(2)) {
        (Some(value), _) => Ok(value.clone()),
        (None, Some(default)) => Ok(default.clone()),
        (None, None) => Err(FuncError::Message(format!("lookup: no key {key:?}"))),
    }
}

pub fn element(args: Args) -> Result {
    arity("element", &args, 2)?;
    let items = list("element", &args[0])?;
    if items.is_empty() {
        return Err(FuncError::Message(
            "element: cannot use element on an empty list".to_string(),
        ));
    }
    let index = integer("element", &args[1])?;
    if index < 0 {
        return Err(FuncError::Message(
            "element: index must not be negative".to_string(),
        ));
    }
    Ok(items[index as usize % items.len()].clone())
}

pub fn slice(args: Args) -> Result {
    arity("slice", &args, 3)?;
    let items = list("slice", &args[0])?;
    let start = integer("slice", &args[1])?;
    let end = integer("slice", &args[2])?;
    if start < 0 || end < start || end as usize > items.len() {
        return Err(FuncError::Message(format!(
            "slice: invalid range {start}..{end} for a list of length {}",
            items.len()
        )));
    }
    Ok(MarkedValue::array(
        items[start as usize..end as usize].to_vec(),
    ))
}

pub fn compact(args: Args) -> Result {
    arity("compact", &args, 1)?;
    Ok(MarkedValue::array(
        list("compact", &args[0])?
            .iter()
            .filter(|item| !item.is_null() && item.as_str() != Some(""))
            .cloned()
            .collect(),
    ))
}

pub fn distinct(args: Args) -> Result {
    arity("distinct", &args, 1)?;
    let mut out: Vec<MarkedValue> = vec![];
    for item in list("distinct", &args[0])? {
        if !out.iter().any(|known| same(known, item)) {
            out.push(item.clone());
        }
    }
    Ok(MarkedValue::array(out))
}

pub fn reverse(args: Args) -> Result {
    arity("reverse", &args, 1)?;
    let mut items = list("reverse", &args[0])?.to_vec();
    items.reverse();
    Ok(MarkedValue::array(items))
}

pub fn chunklist(args: Args) -> Result {
    arity("chunklist", &args, 2)?;
    let items = list("chunklist", &args[0])?;
    let size = integer("chunklist", &args[1])?;
    if size < 0 {
        return Err(FuncError::Message(
            "chunklist: the size must not be negative".to_string(),
        ));
    }
    if size == 0 {
        return Ok(MarkedValue::array(vec![MarkedValue::array(items.to_vec())]));
    }

    Ok(MarkedValue::array(
        items
            .chunks(size as usize)
            .map(|chunk| MarkedValue::array(chunk.to_vec()))
            .collect(),
    ))
}

/// The first argument that is a non-empty list
pub fn coalescelist(args: Args) -> Result {
    at_least("coalescelist", &args, 1)?;
    for arg in &args {
        if !list("coalescelist", arg)?.is_empty() {
            return Ok(arg.clone());
        }
    }
    Err(FuncError::Message(
        "coalescelist: no non-empty list arguments".to_string(),
    ))
}

pub fn assertnotnull(args: Args) -> Result {
    arity("assertnotnull", &args, 1)?;
    match args.into_iter().next() {
        Some(value) if !value.is_null() => Ok(value),
        _ => Err(FuncError::Message(
            "assertnotnull: argument must not be null".to_string(),
        )),
    }
}

fn set<'v>(name: &'static str, value: &'v MarkedValue) -> std::result::Result<Vec<&'v MarkedValue>, FuncError> {
    let mut items: Vec<&MarkedValue> = vec![];
    for item in list(name, value)? {
        if !items.iter().any(|known| same(known, item)) {
            items.push(item);
        }
    }
    Ok(items)
}

fn owned(items: Vec<&MarkedValue>) -> MarkedValue {
    MarkedValue::array(items.into_iter().cloned().collect())
}

pub fn sethaselement(args: Args) -> Result {
    arity("sethaselement", &args, 2)?;
    let found = set("sethaselement", &args[0])?
        .into_iter()
        .any(|item| same(item, &args[1]));
    Ok(MarkedValue::from(found))
}

pub fn setunion(args: Args) -> Result {
    at_least("setunion", &args, 1)?;
    let mut union: Vec<&MarkedValue> = vec![];
    for arg in &args {
        for item in set("setunion", arg)? {
            if !union.iter().any(|known| same(known, item)) {
                union.push(item);
            }
        }
    }
    Ok(owned(union))
}

pub fn setintersection(args: Args) -> Result {
    at_least("setintersection", &args, 1)?;
    let mut intersection = set("setintersection", &args[0])?;
    for arg in &args[1..] {
        let other = set("setintersection", arg)?;
        intersection.retain(|item| other.iter().any(|known| same(known, item)));
    }
    Ok(owned(intersection))
}

pub fn setsubtract(args: Args) -> Result {
    arity("setsubtract", &args, 2)?;
    let subtract = set("setsubtract", &args[1])?;
    let mut remaining = set("setsubtract", &args[0])?;
    remaining.retain(|item| !subtract.iter().any(|known| same(known, item)));
    Ok(owned(remaining))
}

/// Elements found in an odd number of the arguments
pub fn setsymmetricdifference(args: Args) -> Result {
    at_least("setsymmetricdifference", &args, 1)?;
    let mut difference: Vec<&MarkedValue> = vec![];
    for arg in &args {
        for item in set("setsymmetricdifference", arg)? {
            match difference.iter().position(|known| same(known, item)) {
                Some(position) => {
                    difference.remove(position);
                }
                None => difference.push(item),
            }
        }
    }
    Ok(owned(difference))
}

/// Every combination taking one element of each argument
pub fn setproduct(args: Args) -> Result {
    at_least("setproduct", &args, 1)?;
    let mut product: Vec<Vec<&MarkedValue>> = vec![vec![]];
    for arg in &args {
        let items = set("setproduct", arg)?;
        product = product
            .into_iter()
            .flat_map(|prefix| {
                items.iter().map(move |item| {
                    let mut combination = prefix.clone();
                    combination.push(*item);
                    combination
                })
            })
            .collect();
    }
    Ok(MarkedValue::array(product.into_iter().map(owned).collect()))
}

pub fn sort(args: Args) -> Result {
    arity("sort", &args, 1)?;
    let mut items = list("sort", &args[0])?
        .iter()
        .map(|item| string("sort", item).map(str::to_string))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    items.sort();
    Ok(strings(items))
}

pub fn zipmap(args: Args) -> Result {
    arity("zipmap", &args, 2)?;
    let keys = list("zipmap", &args[0])?;
    let values = list("zipmap", &args[1])?;
    if keys.len() != values.len() {
        return Err(FuncError::Message(format!(
            "zipmap: {} keys but {} values",
            keys.len(),
            values.len()
        )));
    }

    let mut entries = IndexMap::new();
    for (key, value) in keys.iter().zip(values) {
        entries.insert(string("zipmap", key)?.to_string(), value.clone());
    }
    Ok(MarkedValue::object(entries))
}

pub fn coalesce(args: Args) -> Result {
    args.into_iter()
        .find(|arg| !arg.is_null() && arg.as_str() != Some(""))
        .ok_or_else(|| FuncError::Message("coalesce: no non-null arguments".to_string()))
}

pub fn range(args: Args) -> Result {
    let (start, end, step) = match args.len() {
        1 => (0.0, float("range", &args[0])?, 1.0),
        2 => (float("range", &args[0])?, float("range", &args[1])?, 1.0),
        3 => (
            float("range", &args[0])?,
            float("range", &args[1])?,
            float("range", &args[2])?,
        ),
        got => {
            return Err(FuncError::Arity {
                name: "range".to_string(),
                expected: 1,
                got,
            })
        }
    };

    if step == 0.0 || (step > 0.0) != (end >= start) && start != end {
        return Err(FuncError::Message(
            "range: step must move from start towards end".to_string(),
        ));
    }

    let mut items = vec![];
    let mut current = start;
    while (step > 0.0 && current < end) || (step < 0.0 && current > end) {
        items.push(number(current)?);
        current += step;
    }
    Ok(MarkedValue::array(items))
}

pub fn tolist(args: Args) -> Result {
    arity("tolist", &args, 1)?;
    list("tolist", &args[0])?;
    Ok(args.into_iter().next().unwrap_or_else(MarkedValue::null))
}

pub fn tomap(args: Args) -> Result {
    arity("tomap", &args, 1)?;
    object("tomap", &args[0])?;
    Ok(args.into_iter().next().unwrap_or_else(MarkedValue::null))
}

pub fn upper(args: Args) -> Result {
    arity("upper", &args, 1)?;
    Ok(MarkedValue::from(string("upper", &args[0])?.to_uppercase()))
}

pub fn lower(args: Args) -> Result {
    arity("lower", &args, 1)?;
    Ok(MarkedValue::from(string("lower", &args[0])?.to_lowercase()))
}

pub fn title(args: Args) -> Result {
    arity("title", &args, 1)?;
    let mut out = String::new();
    let mut word_start = true;
    for char in string("title", &args[0])?.chars() {
        if word_start {
            out.extend(char.to_uppercase());
        } else {
            out.push(char);
        }
        word_start = char.is_whitespace();
    }
    Ok(MarkedValue::from(out))
}

/// Renders a value the way `%v` and `tostring` show it
fn display(value: &MarkedValue) -> String {
    match &value.kind {
        ValueKind::String(string) => string.clone(),
        ValueKind::Number(number) => number.to_string(),
        ValueKind::Bool(bool) => bool.to_string(),
        ValueKind::Null => "null".to_string(),
        _ => value.to_json().to_string(),
    }
}

/// printf style formatting: `%s`, `%v`, `%d`, `%f`, `%.Nf`, `%q` and `%%`
pub fn format(args: Args) -> Result {
    at_least("format", &args, 1)?;
    let spec = string("format", &args[0])?;
    let mut values = args[1..].iter();
    let mut out = String::new();
    let mut chars = spec.chars().peekable();

    while let Some(char) = chars.next() {
        if char != '%' {
            out.push(char);
            continue;
        }

        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(digit) = chars.peek().filter(|c| c.is_ascii_digit()) {
                digits.push(*digit);
                chars.next();
            }
            precision = digits.parse::<usize>().ok();
        }

        let verb = chars
            .next()
            .ok_or_else(|| FuncError::Message("format: dangling %".to_string()))?;
        if verb == '%' {
            out.push('%');
            continue;
        }

        let value = values
            .next()
            .ok_or_else(|| FuncError::Message(format!("format: missing value for %{verb}")))?;
        match verb {
            's' | 'v' => out.push_str(&display(value)),
            'd' => out.push_str(&integer("format", value)?.to_string()),
            'f' => out.push_str(&format!(
                "{:.*}",
                precision.unwrap_or(6),
                float("format", value)?
            )),
            'q' => out.push_str(&serde_json::Value::String(display(value)).to_string()),
            verb => {
                return Err(FuncError::Message(format!(
                    "format: unsupported verb %{verb}"
                )))
            }
        }
    }

    Ok(MarkedValue::from(out))
}

/// [format] once per list element, scalars are repeated for every line
pub fn formatlist(args: Args) -> Result {
    at_least("formatlist", &args, 1)?;
    let mut lines = None;
    for arg in &args {
        if let Some(items) = arg.as_array() {
            match lines {
                Some(known) if known != items.len() => {
                    return Err(FuncError::Message(format!(
                        "formatlist: all lists must have the same length, got {known} and {}",
                        items.len()
                    )))
                }
                _ => lines = Some(items.len()),
            }
        }
    }

    let Some(lines) = lines else {
        return Ok(MarkedValue::array(vec![format(args)?]));
    };

    let mut out = Vec::with_capacity(lines);
    for line in 0..lines {
        let line_args = args
            .iter()
            .map(|arg| match arg.as_array() {
                Some(items) => items[line].clone(),
                None => arg.clone(),
            })
            .collect();
        out.push(format(line_args)?);
    }
    Ok(MarkedValue::array(out))
}

pub fn join(args: Args) -> Result {
    at_least("join", &args, 2)?;
    let separator = string("join", &args[0])?;
    let mut parts = vec![];
    for arg in &args[1..] {
        for item in list("join", arg)? {
            parts.push(string("join", item)?);
        }
    }
    Ok(MarkedValue::from(parts.join(separator)))
}

pub fn split(args: Args) -> Result {
    arity("split", &args, 2)?;
    let separator = string("split", &args[0])?;
    let value = string("split", &args[1])?;
    if value.is_empty() {
        return Ok(MarkedValue::array(vec![]));
    }
    Ok(strings(value.split(separator).map(str::to_string)))
}

fn compile(name: &str, pattern: &str) -> std::result::Result<regex::Regex, FuncError> {
    regex::Regex::new(pattern)
        .map_err(|err| FuncError::Message(format!("{name}: invalid pattern: {err}")))
}

/// `replace(string, substring, replacement)`, a substring wrapped in `/` is a regular expression
pub fn replace(args: Args) -> Result {
    arity("replace", &args, 3)?;
    let value = string("replace", &args[0])?;
    let search = string("replace", &args[1])?;
    let replacement = string("replace", &args[2])?;

    if search.len() > 1 && search.starts_with('/') && search.ends_with('/') {
        let pattern = compile("replace", &search[1..search.len() - 1])?;
        return Ok(MarkedValue::from(
            pattern.replace_all(value, replacement).into_owned(),
        ));
    }

    Ok(MarkedValue::from(value.replace(search, replacement)))
}

pub fn trim(args: Args) -> Result {
    arity("trim", &args, 2)?;
    let cutset: Vec<char> = string("trim", &args[1])?.chars().collect();
    Ok(MarkedValue::from(
        string("trim", &args[0])?.trim_matches(cutset.as_slice()),
    ))
}

pub fn trimprefix(args: Args) -> Result {
    arity("trimprefix", &args, 2)?;
    let value = string("trimprefix", &args[0])?;
    let prefix = string("trimprefix", &args[1])?;
    Ok(MarkedValue::from(value.strip_prefix(prefix).unwrap_or(value)))
}

pub fn trimsuffix(args: Args) -> Result {
    arity("trimsuffix", &args, 2)?;
    let value = string("trimsuffix", &args[0])?;
    let suffix = string("trimsuffix", &args[1])?;
    Ok(MarkedValue::from(value.strip_suffix(suffix).unwrap_or(value)))
}

pub fn trimspace(args: Args) -> Result {
    arity("trimspace", &args, 1)?;
    Ok(MarkedValue::from(string("trimspace", &args[0])?.trim()))
}

pub fn chomp(args: Args) -> Result {
    arity("chomp", &args, 1)?;
    Ok(MarkedValue::from(
        string("chomp", &args[0])?.trim_end_matches(['\n', '\r']),
    ))
}

/// Indents every line but the first
pub fn indent(args: Args) -> Result {
    arity("indent", &args, 2)?;
    let width = integer("indent", &args[0])?.max(0) as usize;
    let padding = " ".repeat(width);
    let value = string("indent", &args[1])?;
    Ok(MarkedValue::from(
        value.replace('\n', &format!("\n{padding}")),
    ))
}

pub fn substr(args: Args) -> Result {
    arity("substr", &args, 3)?;
    let chars: Vec<char> = string("substr", &args[0])?.chars().collect();
    let offset = integer("substr", &args[1])?;
    let length = integer("substr", &args[2])?;

    let start = if offset < 0 {
        chars.len().saturating_sub(offset.unsigned_abs() as usize)
    } else {
        (offset as usize).min(chars.len())
    };
    let end = if length < 0 {
        chars.len()
    } else {
        (start + length as usize).min(chars.len())
    };

    Ok(MarkedValue::from(chars[start..end].iter().collect::<String>()))
}

pub fn strrev(args: Args) -> Result {
    arity("strrev", &args, 1)?;
    Ok(MarkedValue::from(
        string("strrev", &args[0])?.chars().rev().collect::<String>(),
    ))
}

pub fn startswith(args: Args) -> Result {
    arity("startswith", &args, 2)?;
    Ok(MarkedValue::from(
        string("startswith", &args[0])?.starts_with(string("startswith", &args[1])?),
    ))
}

pub fn byteslen(args: Args) -> Result {
    arity("byteslen", &args, 1)?;
    Ok(MarkedValue::from(string("byteslen", &args[0])?.len() as i64))
}

pub fn byteslice(args: Args) -> Result {
    arity("byteslice", &args, 3)?;
    let value = string("byteslice", &args[0])?;
    let offset = integer("byteslice", &args[1])?;
    let length = integer("byteslice", &args[2])?;
    if offset < 0 || length < 0 {
        return Err(FuncError::Message(
            "byteslice: offset and length must not be negative".to_string(),
        ));
    }

    let start = offset as usize;
    let end = start.saturating_add(length as usize);
    value
        .get(start..end)
        .map(MarkedValue::from)
        .ok_or_else(|| {
            FuncError::Message(format!(
                "byteslice: {start}..{end} is out of bounds or splits a character"
            ))
        })
}

pub fn endswith(args: Args) -> Result {
    arity("endswith", &args, 2)?;
    Ok(MarkedValue::from(
        string("endswith", &args[0])?.ends_with(string("endswith", &args[1])?),
    ))
}

/// Without capture groups the match itself, named groups become an object, unnamed ones a list
fn captures(pattern: &regex::Regex, captures: regex::Captures<'_>) -> MarkedValue {
    let text = |index: usize| {
        captures
            .get(index)
            .map(|group| MarkedValue::from(group.as_str()))
            .unwrap_or_else(MarkedValue::null)
    };

    if pattern.captures_len() == 1 {
        return text(0);
    }

    let names: Vec<Option<&str>> = pattern.capture_names().skip(1).collect();
    if names.iter().all(Option::is_some) {
        return MarkedValue::object(
            names
                .iter()
                .enumerate()
                .filter_map(|(index, name)| name.map(|name| (name.to_string(), text(index + 1))))
                .collect(),
        );
    }

    MarkedValue::array((1..pattern.captures_len()).map(text).collect())
}

pub fn regex(args: Args) -> Result {
    arity("regex", &args, 2)?;
    let pattern = compile("regex", string("regex", &args[0])?)?;
    let value = string("regex", &args[1])?;
    let found = pattern
        .captures(value)
        .ok_or_else(|| FuncError::Message("regex: pattern did not match".to_string()))?;
    Ok(captures(&pattern, found))
}

pub fn regexall(args: Args) -> Result {
    arity("regexall", &args, 2)?;
    let pattern = compile("regexall", string("regexall", &args[0])?)?;
    let value = string("regexall", &args[1])?;
    Ok(MarkedValue::array(
        pattern
            .captures_iter(value)
            .map(|found| captures(&pattern, found))
            .collect(),
    ))
}

pub fn regexreplace(args: Args) -> Result {
    arity("regexreplace", &args, 3)?;
    let value = string("regexreplace", &args[0])?;
    let pattern = compile("regexreplace", string("regexreplace", &args[1])?)?;
    let replacement = string("regexreplace", &args[2])?;
    Ok(MarkedValue::from(
        pattern.replace_all(value, replacement).into_owned(),
    ))
}

/// First line names the columns, every following line becomes an object
pub fn csvdecode(args: Args) -> Result {
    arity("csvdecode", &args, 1)?;
    let mut records = csv_records(string("csvdecode", &args[0])?)?.into_iter();
    let Some(header) = records.next() else {
        return Err(FuncError::Message("csvdecode: missing header line".to_string()));
    };

    let mut rows = vec![];
    for (line, record) in records.enumerate() {
        if record.len() != header.len() {
            return Err(FuncError::Message(format!(
                "csvdecode: record {} has {} fields, the header has {}",
                line + 1,
                record.len(),
                header.len()
            )));
        }
        rows.push(MarkedValue::object(
            header
                .iter()
                .cloned()
                .zip(record.into_iter().map(MarkedValue::from))
                .collect(),
        ));
    }
    Ok(MarkedValue::array(rows))
}

/// Comma separated fields, double quotes around fields containing commas, quotes or line breaks
fn csv_records(input: &str) -> std::result::Result<Vec<Vec<String>>, FuncError> {
    let mut records = vec![];
    let mut record = vec![];
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = input.chars().peekable();

    while let Some(char) = chars.next() {
        match (quoted, char) {
            (true, '"') if chars.peek() == Some(&'"') => {
                chars.next();
                field.push('"');
            }
            (true, '"') => quoted = false,
            (true, char) => field.push(char),
            (false, '"') if field.is_empty() => quoted = true,
            (false, ',') => record.push(std::mem::take(&mut field)),
            (false, '\r') if chars.peek() == Some(&'\n') => {}
            (false, '\n') => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            (false, char) => field.push(char),
        }
    }

    if quoted {
        return Err(FuncError::Message("csvdecode: unterminated quote".to_string()));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

pub fn jsonencode(args: Args) -> Result {
    arity("jsonencode", &args, 1)?;
    serde_json::to_string(&args[0].to_json())
        .map(MarkedValue::from)
        .map_err(|err| FuncError::Message(format!("jsonencode: {err}")))
}

pub fn jsondecode(args: Args) -> Result {
    arity("jsondecode", &args, 1)?;
    serde_json::from_str::<serde_json::Value>(string("jsondecode", &args[0])?)
        .map(MarkedValue::from)
        .map_err(|err| FuncError::Message(format!("jsondecode: {err}")))
}

pub fn yamlencode(args: Args) -> Result {
    arity("yamlencode", &args, 1)?;
    serde_yaml::to_string(&args[0].to_json())
        .map(MarkedValue::from)
        .map_err(|err| FuncError::Message(format!("yamlencode: {err}")))
}

pub fn yamldecode(args: Args) -> Result {
    arity("yamldecode", &args, 1)?;
    serde_yaml::from_str::<serde_json::Value>(string("yamldecode", &args[0])?)
        .map(MarkedValue::from)
        .map_err(|err| FuncError::Message(format!("yamldecode: {err}")))
}

pub fn base64encode(args: Args) -> Result {
    arity("base64encode", &args, 1)?;
    Ok(MarkedValue::from(
        base64::engine::general_purpose::STANDARD.encode(string("base64encode", &args[0])?),
    ))
}

pub fn base64decode(args: Args) -> Result {
    arity("base64decode", &args, 1)?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(string("base64decode", &args[0])?)
        .map_err(|err| FuncError::Message(format!("base64decode: {err}")))?;
    String::from_utf8(bytes)
        .map(MarkedValue::from)
        .map_err(|_| FuncError::Message("base64decode: result is not valid utf-8".to_string()))
}

pub fn tostring(args: Args) -> Result {
    arity("tostring", &args, 1)?;
    match &args[0].kind {
        ValueKind::Null => Ok(MarkedValue::null()),
        ValueKind::String(_) | ValueKind::Number(_) | ValueKind::Bool(_) => {
            Ok(MarkedValue::from(display(&args[0])))
        }
        _ => Err(FuncError::Type {
            name: "tostring",
            expected: "primitive",
            got: args[0].type_name(),
        }),
    }
}

pub fn tonumber(args: Args) -> Result {
    arity("tonumber", &args, 1)?;
    match &args[0].kind {
        ValueKind::Null => Ok(MarkedValue::null()),
        ValueKind::Number(_) => Ok(args[0].clone()),
        ValueKind::String(string) => {
            let parsed: f64 = string
                .trim()
                .parse()
                .map_err(|_| FuncError::Message(format!("tonumber: {string:?} is not a number")))?;
            number(parsed)
        }
        _ => Err(FuncError::Type {
            name: "tonumber",
            expected: "number or string",
            got: args[0].type_name(),
        }),
    }
}

pub fn tobool(args: Args) -> Result {
    arity("tobool", &args, 1)?;
    match &args[0].kind {
        ValueKind::Null => Ok(MarkedValue::null()),
        ValueKind::Bool(_) => Ok(args[0].clone()),
        ValueKind::String(string) if string == "true" => Ok(MarkedValue::from(true)),
        ValueKind::String(string) if string == "false" => Ok(MarkedValue::from(false)),
        _ => Err(FuncError::Type {
            name: "tobool",
            expected: "bool or \"true\"/\"false\"",
            got: args[0].type_name(),
        }),
    }
}

pub fn abs(args: Args) -> Result {
    arity("abs", &args, 1)?;
    number(float("abs", &args[0])?.abs())
}

pub fn ceil(args: Args) -> Result {
    arity("ceil", &args, 1)?;
    number(float("ceil", &args[0])?.ceil())
}

pub fn floor(args: Args) -> Result {
    arity("floor", &args, 1)?;
    number(float("floor", &args[0])?.floor())
}

pub fn max(args: Args) -> Result {
    at_least("max", &args, 1)?;
    let mut result = f64::NEG_INFINITY;
    for arg in &args {
        result = result.max(float("max", arg)?);
    }
    number(result)
}

pub fn min(args: Args) -> Result {
    at_least("min", &args, 1)?;
    let mut result = f64::INFINITY;
    for arg in &args {
        result = result.min(float("min", arg)?);
    }
    number(result)
}

pub fn pow(args: Args) -> Result {
    arity("pow", &args, 2)?;
    number(float("pow", &args[0])?.powf(float("pow", &args[1])?))
}

pub fn log(args: Args) -> Result {
    arity("log", &args, 2)?;
    number(float("log", &args[0])?.log(float("log", &args[1])?))
}

pub fn signum(args: Args) -> Result {
    arity("signum", &args, 1)?;
    let value = float("signum", &args[0])?;
    number(if value == 0.0 { 0.0 } else { value.signum() })
}

pub fn parseint(args: Args) -> Result {
    arity("parseint", &args, 2)?;
    let value = string("parseint", &args[0])?;
    let base = integer("parseint", &args[1])?;
    if !(2..=36).contains(&base) {
        return Err(FuncError::Message(format!(
            "parseint: base must be between 2 and 36, got {base}"
        )));
    }
    i64::from_str_radix(value, base as u32)
        .map(MarkedValue::from)
        .map_err(|err| FuncError::Message(format!("parseint: {err}")))
}

pub fn int(args: Args) -> Result {
    arity("int", &args, 1)?;
    number(float("int", &args[0])?.trunc())
}

fn arithmetic(
    name: &'static str,
    args: &[MarkedValue],
    integers: fn(i64, i64) -> Option<i64>,
    decimals: fn(f64, f64) -> f64,
) -> Result {
    arity(name, args, 2)?;
    let (a, b) = (&args[0], &args[1]);
    let exact = a
        .as_number()
        .and_then(hcl::Number::as_i64)
        .zip(b.as_number().and_then(hcl::Number::as_i64))
        .and_then(|(a, b)| integers(a, b));

    match exact {
        Some(result) => Ok(MarkedValue::from(result)),
        None => number(decimals(float(name, a)?, float(name, b)?)),
    }
}

pub fn add(args: Args) -> Result {
    arithmetic("add", &args, i64::checked_add, |a, b| a + b)
}

pub fn subtract(args: Args) -> Result {
    arithmetic("subtract", &args, i64::checked_sub, |a, b| a - b)
}

pub fn multiply(args: Args) -> Result {
    arithmetic("multiply", &args, i64::checked_mul, |a, b| a * b)
}

pub fn divide(args: Args) -> Result {
    arity("divide", &args, 2)?;
    let divisor = float("divide", &args[1])?;
    if divisor == 0.0 {
        return Err(FuncError::Message("divide: division by zero".to_string()));
    }
    number(float("divide", &args[0])? / divisor)
}

pub fn modulo(args: Args) -> Result {
    arity("modulo", &args, 2)?;
    if float("modulo", &args[1])? == 0.0 {
        return Err(FuncError::Message("modulo: division by zero".to_string()));
    }
    arithmetic("modulo", &args, i64::checked_rem, |a, b| a % b)
}

pub fn negate(args: Args) -> Result {
    arity("negate", &args, 1)?;
    number(-float("negate", &args[0])?)
}

pub fn equal(args: Args) -> Result {
    arity("equal", &args, 2)?;
    Ok(MarkedValue::from(same(&args[0], &args[1])))
}

pub fn notequal(args: Args) -> Result {
    arity("notequal", &args, 2)?;
    Ok(MarkedValue::from(!same(&args[0], &args[1])))
}

fn compare(name: &'static str, args: &[MarkedValue], check: fn(f64, f64) -> bool) -> Result {
    arity(name, args, 2)?;
    Ok(MarkedValue::from(check(
        float(name, &args[0])?,
        float(name, &args[1])?,
    )))
}

pub fn greaterthan(args: Args) -> Result {
    compare("greaterthan", &args, |a, b| a > b)
}

pub fn greaterthanorequalto(args: Args) -> Result {
    compare("greaterthanorequalto", &args, |a, b| a >= b)
}

pub fn lessthan(args: Args) -> Result {
    compare("lessthan", &args, |a, b| a < b)
}

pub fn lessthanorequalto(args: Args) -> Result {
    compare("lessthanorequalto", &args, |a, b| a <= b)
}

pub fn not(args: Args) -> Result {
    arity("not", &args, 1)?;
    Ok(MarkedValue::from(!boolean("not", &args[0])?))
}

pub fn and(args: Args) -> Result {
    at_least("and", &args, 1)?;
    let mut result = true;
    for arg in &args {
        result &= boolean("and", arg)?;
    }
    Ok(MarkedValue::from(result))
}

pub fn or(args: Args) -> Result {
    at_least("or", &args, 1)?;
    let mut result = false;
    for arg in &args {
        result |= boolean("or", arg)?;
    }
    Ok(MarkedValue::from(result))
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn call(function: fn(Args) -> Result, args: serde_json::Value) -> serde_json::Value {
        let serde_json::Value::Array(args) = args else {
            panic!("arguments must be a list");
        };
        function(args.into_iter().map(MarkedValue::from).collect())
            .unwrap()
            .to_json()
    }

    #[test]
    fn strings() {
        assert_eq!(call(upper, json!(["abc"])), json!("ABC"));
        assert_eq!(call(title, json!(["hello big world"])), json!("Hello Big World"));
        assert_eq!(call(substr, json!(["hello", 1, 3])), json!("ell"));
        assert_eq!(call(substr, json!(["hello", -3, -1])), json!("llo"));
        assert_eq!(call(trim, json!(["--x--", "-"])), json!("x"));
        assert_eq!(call(chomp, json!(["line\n\n"])), json!("line"));
        assert_eq!(call(indent, json!([2, "a\nb"])), json!("a\n  b"));
        assert_eq!(call(split, json!([",", "a,b"])), json!(["a", "b"]));
        assert_eq!(call(join, json!(["-", ["a"], ["b", "c"]])), json!("a-b-c"));
        assert_eq!(call(strrev, json!(["abc"])), json!("cba"));
    }

    #[test]
    fn format_verbs() {
        assert_eq!(
            call(format, json!(["%s=%d (%.2f) %q %%", "x", 3, 1.5, "y"])),
            json!("x=3 (1.50) \"y\" %")
        );
    }

    #[test]
    fn regular_expressions() {
        assert_eq!(call(regex, json!(["[a-z]+", "123abc"])), json!("abc"));
        assert_eq!(
            call(regex, json!(["(?P<major>\\d+)\\.(?P<minor>\\d+)", "v1.22"])),
            json!({"major": "1", "minor": "22"})
        );
        assert_eq!(
            call(regexall, json!(["(\\d)(\\w)", "1a 2b"])),
            json!([["1", "a"], ["2", "b"]])
        );
        assert_eq!(call(replace, json!(["a-b-c", "/-/", "+"])), json!("a+b+c"));
        assert_eq!(call(replace, json!(["a.b", ".", "/"])), json!("a/b"));
        assert!(regex(vec![MarkedValue::from("x"), MarkedValue::from("y")]).is_err());
    }

    #[test]
    fn collections() {
        assert_eq!(call(keys, json!([{"b": 1, "a": 2}])), json!(["a", "b"]));
        assert_eq!(call(values, json!([{"b": 1, "a": 2}])), json!([2, 1]));
        assert_eq!(call(flatten, json!([[1, [2, [3]]]])), json!([1, 2, 3]));
        assert_eq!(call(distinct, json!([[1, 2, 1]])), json!([1, 2]));
        assert_eq!(call(compact, json!([["a", "", null, "b"]])), json!(["a", "b"]));
        assert_eq!(call(element, json!([["a", "b"], 3])), json!("b"));
        assert_eq!(call(slice, json!([[1, 2, 3], 1, 3])), json!([2, 3]));
        assert_eq!(call(lookup, json!([{"a": 1}, "b", 0])), json!(0));
        assert_eq!(call(zipmap, json!([["a", "b"], [1, 2]])), json!({"a": 1, "b": 2}));
        assert_eq!(call(range, json!([3])), json!([0, 1, 2]));
        assert_eq!(call(range, json!([1, 7, 3])), json!([1, 4]));
        assert_eq!(call(coalesce, json!([null, "", "x"])), json!("x"));
        assert_eq!(call(contains, json!([["a"], "a"])), json!(true));
        assert_eq!(call(length, json!(["héllo"])), json!(5));
    }

    #[test]
    fn sets() {
        assert_eq!(call(setunion, json!([["a", "b"], ["b", "c"]])), json!(["a", "b", "c"]));
        assert_eq!(call(setintersection, json!([["a", "b", "c"], ["c", "a"]])), json!(["a", "c"]));
        assert_eq!(call(setsubtract, json!([["a", "b", "a"], ["b"]])), json!(["a"]));
        assert_eq!(
            call(setsymmetricdifference, json!([[1, 2], [2, 3], [3, 4]])),
            json!([1, 4])
        );
        assert_eq!(call(sethaselement, json!([[1, 2], 2])), json!(true));
        assert_eq!(
            call(setproduct, json!([["a", "b"], [1, 2]])),
            json!([["a", 1], ["a", 2], ["b", 1], ["b", 2]])
        );
    }

    #[test]
    fn lists() {
        assert_eq!(call(reverse, json!([[1, 2, 3]])), json!([3, 2, 1]));
        assert_eq!(call(chunklist, json!([[1, 2, 3], 2])), json!([[1, 2], [3]]));
        assert_eq!(call(coalescelist, json!([[], ["a"], ["b"]])), json!(["a"]));
        assert_eq!(
            call(formatlist, json!(["%s=%d", ["a", "b"], [1, 2]])),
            json!(["a=1", "b=2"])
        );
        assert_eq!(call(formatlist, json!(["-%s", "x"])), json!(["-x"]));
        assert!(formatlist(vec!["%s%s".into(), json!(["a"]).into(), json!(["b", "c"]).into()]).is_err());
        assert!(assertnotnull(vec![MarkedValue::null()]).is_err());
    }

    #[test]
    fn csv() {
        assert_eq!(
            call(csvdecode, json!(["name,port\nweb,80\r\n\"api, v2\",\"8\"\"080\"\n"])),
            json!([
                {"name": "web", "port": "80"},
                {"name": "api, v2", "port": "8\"080"}
            ])
        );
        assert!(csvdecode(vec!["a,b\n1\n".into()]).is_err());
    }

    #[test]
    fn bytes() {
        assert_eq!(call(byteslen, json!(["héllo"])), json!(6));
        assert_eq!(call(byteslice, json!(["héllo", 3, 2])), json!("ll"));
        assert!(byteslice(vec!["héllo".into(), 2i64.into(), 1i64.into()]).is_err());
    }

    #[test]
    fn numbers() {
        assert_eq!(call(add, json!([1, 2])), json!(3));
        assert_eq!(call(divide, json!([7, 2])), json!(3.5));
        assert_eq!(call(modulo, json!([7, 2])), json!(1));
        assert_eq!(call(max, json!([1, 5, 3])), json!(5));
        assert_eq!(call(parseint, json!(["ff", 16])), json!(255));
        assert_eq!(call(signum, json!([-4])), json!(-1));
        assert_eq!(call(log, json!([1, 10])), json!(0));
        assert!(divide(vec![MarkedValue::from(1i64), MarkedValue::from(0i64)]).is_err());
    }

    #[test]
    fn encodings() {
        assert_eq!(call(jsonencode, json!([{"a": [1]}])), json!(r#"{"a":[1]}"#));
        assert_eq!(call(jsondecode, json!([r#"{"a": true}"#])), json!({"a": true}));
        assert_eq!(call(base64encode, json!(["hi"])), json!("aGk="));
        assert_eq!(call(base64decode, json!(["aGk="])), json!("hi"));
        assert_eq!(call(tostring, json!([12])), json!("12"));
        assert_eq!(call(tonumber, json!(["1.5"])), json!(1.5));
    }

    #[test]
    fn wrong_types_are_reported() {
        let err = upper(vec![MarkedValue::from(1i64)]).unwrap_err();
        assert_eq!(err.to_string(), "upper: expected string, got number");
    }
}
