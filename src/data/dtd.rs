use std::collections::{BTreeSet, HashMap, HashSet};

use log::{debug, warn};

use crate::error::DtdError;

/// Entities every XML processor knows without a declaration.
const PREDEFINED_ENTITIES: [(&str, &str); 5] = [
    ("lt", "<"),
    ("gt", ">"),
    ("amp", "&"),
    ("apos", "'"),
    ("quot", "\""),
];

const MAX_EXPANSION_ROUNDS: usize = 32;
/// Upper bound on the replacement text of any single entity.
const MAX_ENTITY_LENGTH: usize = 1 << 20;
const MAX_INCLUDE_DEPTH: usize = 8;

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

/// Content specification of an `<!ELEMENT>` declaration, reduced to the set
/// of child element names it mentions. Ordering and cardinality are not kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSpec {
    Empty,
    Any,
    /// `(#PCDATA | a | b)*`
    Mixed(BTreeSet<String>),
    /// Element-only content such as `(a, b?, c*)`.
    Children(BTreeSet<String>),
}

impl ContentSpec {
    pub fn allows(&self, child: &str) -> bool {
        match self {
            ContentSpec::Empty => false,
            ContentSpec::Any => true,
            ContentSpec::Mixed(names) | ContentSpec::Children(names) => names.contains(child),
        }
    }

    /// Whether character data may appear directly inside the element.
    pub fn allows_text(&self) -> bool {
        matches!(self, ContentSpec::Any | ContentSpec::Mixed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeType {
    CData,
    /// `ID`, `IDREF`, `NMTOKEN`, ... (not checked further).
    Tokenized(String),
    /// `(a|b|c)` or `NOTATION (a|b)`.
    Enumerated(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeDefault {
    Required,
    Implied,
    Fixed(String),
    Value(String),
}

impl AttributeDefault {
    /// The value an absent attribute takes, if any.
    pub fn value(&self) -> Option<&str> {
        match self {
            AttributeDefault::Fixed(v) | AttributeDefault::Value(v) => Some(v),
            AttributeDefault::Required | AttributeDefault::Implied => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDecl {
    pub name: String,
    pub kind: AttributeType,
    pub default: AttributeDefault,
}

// ---------------------------------------------------------------------------
// Dtd
// ---------------------------------------------------------------------------

/// The declarations of a document type definition that matter for reading
/// records: element content, attribute lists, and entities.
#[derive(Debug, Clone)]
pub struct Dtd {
    elements: HashMap<String, ContentSpec>,
    attributes: HashMap<String, Vec<AttributeDecl>>,
    entities: HashMap<String, String>,
    parameter_entities: HashMap<String, String>,
    /// External entities are noted but never fetched. Parameter entities are
    /// stored with their `%` prefix.
    external_entities: HashSet<String>,
}

impl Default for Dtd {
    fn default() -> Self {
        Dtd {
            elements: HashMap::new(),
            attributes: HashMap::new(),
            entities: PREDEFINED_ENTITIES
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            parameter_entities: HashMap::new(),
            external_entities: HashSet::new(),
        }
    }
}

impl Dtd {
    /// Parse the text of an external DTD subset.
    pub fn parse(text: &str) -> Result<Self, DtdError> {
        let mut dtd = Dtd::default();
        dtd.read(text, 0)?;
        dtd.resolve_entities()?;
        debug!(
            "DTD declares {} elements, {} entities, {} parameter entities",
            dtd.elements.len(),
            dtd.entities.len() - PREDEFINED_ENTITIES.len(),
            dtd.parameter_entities.len()
        );
        Ok(dtd)
    }

    pub fn is_declared(&self, element: &str) -> bool {
        self.elements.contains_key(element)
    }

    pub fn content(&self, element: &str) -> Option<&ContentSpec> {
        self.elements.get(element)
    }

    /// Whether `parent`'s content spec admits `child`. Undeclared parents
    /// admit nothing.
    pub fn allows_child(&self, parent: &str, child: &str) -> bool {
        self.content(parent).is_some_and(|c| c.allows(child))
    }

    pub fn attributes_of(&self, element: &str) -> &[AttributeDecl] {
        self.attributes
            .get(element)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn attribute(&self, element: &str, name: &str) -> Option<&AttributeDecl> {
        self.attributes_of(element).iter().find(|a| a.name == name)
    }

    /// Replacement text of a general entity (predefined ones included), with
    /// references to other entities already replaced.
    pub fn entity(&self, name: &str) -> Option<&str> {
        self.entities.get(name).map(String::as_str)
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    // -- reading --

    fn read(&mut self, text: &str, depth: usize) -> Result<(), DtdError> {
        let mut pos = 0;
        while pos < text.len() {
            let rest = &text[pos..];
            let trimmed = rest.trim_start();
            pos += rest.len() - trimmed.len();
            if trimmed.is_empty() {
                break;
            }

            if trimmed.starts_with("<!--") {
                let end = trimmed.find("-->").ok_or(DtdError::Unterminated(pos))?;
                pos += end + 3;
            } else if trimmed.starts_with("<?") {
                let end = trimmed.find("?>").ok_or(DtdError::Unterminated(pos))?;
                pos += end + 2;
            } else if trimmed.starts_with("<![") {
                return Err(DtdError::Unsupported {
                    position: pos,
                    what: "conditional section".to_string(),
                });
            } else if trimmed.starts_with("<!") {
                let end = declaration_end(trimmed).ok_or(DtdError::Unterminated(pos))?;
                self.declare(&trimmed[2..end])?;
                pos += end + 1;
            } else if let Some(after) = trimmed.strip_prefix('%') {
                let end = after.find(';').ok_or(DtdError::Unterminated(pos))?;
                self.include(&after[..end], depth)?;
                pos += end + 2;
            } else {
                let snippet: String = trimmed.chars().take(24).collect();
                return Err(DtdError::Unsupported {
                    position: pos,
                    what: format!("unexpected text `{snippet}`"),
                });
            }
        }
        Ok(())
    }

    /// A parameter entity referenced between declarations.
    fn include(&mut self, name: &str, depth: usize) -> Result<(), DtdError> {
        if depth >= MAX_INCLUDE_DEPTH {
            return Err(DtdError::RecursiveParameterEntity(format!("%{name};")));
        }
        if let Some(value) = self.parameter_entities.get(name).cloned() {
            return self.read(&value, depth + 1);
        }
        if self.external_entities.contains(&format!("%{name}")) {
            warn!("skipping external parameter entity %{name};");
            return Ok(());
        }
        Err(DtdError::UndefinedParameterEntity(name.to_string()))
    }

    fn declare(&mut self, body: &str) -> Result<(), DtdError> {
        let body = body.trim();
        let (keyword, rest) = split_name(body);
        match keyword {
            "ELEMENT" => self.declare_element(rest),
            "ATTLIST" => self.declare_attlist(rest),
            "ENTITY" => self.declare_entity(rest),
            "NOTATION" => Ok(()),
            _ => Err(DtdError::Malformed {
                kind: "markup",
                decl: body.to_string(),
            }),
        }
    }

    fn declare_element(&mut self, rest: &str) -> Result<(), DtdError> {
        let text = self.expand_parameter_refs(rest)?;
        let malformed = || DtdError::Malformed {
            kind: "ELEMENT",
            decl: text.trim().to_string(),
        };

        let (name, spec) = split_name(&text);
        let spec = spec.trim();
        if name.is_empty() || spec.is_empty() {
            return Err(malformed());
        }

        let content = match spec {
            "EMPTY" => ContentSpec::Empty,
            "ANY" => ContentSpec::Any,
            s if s.starts_with('(') => {
                let mut names: BTreeSet<String> = s
                    .split(|c: char| "()|,?*+".contains(c) || c.is_whitespace())
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect();
                if names.remove("#PCDATA") {
                    ContentSpec::Mixed(names)
                } else {
                    ContentSpec::Children(names)
                }
            }
            _ => return Err(malformed()),
        };

        if self.elements.contains_key(name) {
            warn!("element <{name}> declared twice; keeping the first declaration");
        } else {
            self.elements.insert(name.to_string(), content);
        }
        Ok(())
    }

    fn declare_attlist(&mut self, rest: &str) -> Result<(), DtdError> {
        let text = self.expand_parameter_refs(rest)?;
        let malformed = || DtdError::Malformed {
            kind: "ATTLIST",
            decl: text.trim().to_string(),
        };

        let mut tokens = Tokens::new(&text);
        let element = match tokens.next() {
            Some(Token::Word(w)) => w.to_string(),
            _ => return Err(malformed()),
        };

        let mut parsed = Vec::new();
        loop {
            let name = match tokens.next() {
                None => break,
                Some(Token::Word(w)) => w.to_string(),
                Some(_) => return Err(malformed()),
            };
            let kind = match tokens.next() {
                Some(Token::Word("CDATA")) => AttributeType::CData,
                Some(Token::Word("NOTATION")) => match tokens.next() {
                    Some(Token::Group(g)) => AttributeType::Enumerated(group_values(g)),
                    _ => return Err(malformed()),
                },
                Some(Token::Word(w)) => AttributeType::Tokenized(w.to_string()),
                Some(Token::Group(g)) => AttributeType::Enumerated(group_values(g)),
                _ => return Err(malformed()),
            };
            let default = match tokens.next() {
                Some(Token::Word("#REQUIRED")) => AttributeDefault::Required,
                Some(Token::Word("#IMPLIED")) => AttributeDefault::Implied,
                Some(Token::Word("#FIXED")) => match tokens.next() {
                    Some(Token::Quoted(v)) => AttributeDefault::Fixed(expand_char_refs(v)?),
                    _ => return Err(malformed()),
                },
                Some(Token::Quoted(v)) => AttributeDefault::Value(expand_char_refs(v)?),
                _ => return Err(malformed()),
            };
            parsed.push(AttributeDecl {
                name,
                kind,
                default,
            });
        }

        // The first declaration of an attribute is binding.
        let declared = self.attributes.entry(element).or_default();
        for decl in parsed {
            if !declared.iter().any(|d| d.name == decl.name) {
                declared.push(decl);
            }
        }
        Ok(())
    }

    fn declare_entity(&mut self, rest: &str) -> Result<(), DtdError> {
        let malformed = || DtdError::Malformed {
            kind: "ENTITY",
            decl: rest.trim().to_string(),
        };

        let mut tokens = Tokens::new(rest);
        let mut first = tokens.next();
        let parameter = matches!(first, Some(Token::Word("%")));
        if parameter {
            first = tokens.next();
        }
        let name = match first {
            Some(Token::Word(w)) => w.to_string(),
            _ => return Err(malformed()),
        };

        match tokens.next() {
            Some(Token::Quoted(v)) => {
                let value = expand_char_refs(&self.expand_parameter_refs(v)?)?;
                let table = if parameter {
                    &mut self.parameter_entities
                } else {
                    &mut self.entities
                };
                table.entry(name).or_insert(value);
            }
            Some(Token::Word("SYSTEM")) | Some(Token::Word("PUBLIC")) => {
                let key = if parameter { format!("%{name}") } else { name };
                self.external_entities.insert(key);
            }
            _ => return Err(malformed()),
        }
        Ok(())
    }

    /// Replace `&name;` references inside general entity values once the
    /// whole DTD is known. Predefined entities stay literal.
    fn resolve_entities(&mut self) -> Result<(), DtdError> {
        let mut resolved = HashMap::with_capacity(self.entities.len());
        let names: Vec<String> = self.entities.keys().cloned().collect();
        for name in names {
            self.resolve_entity(&name, &mut resolved, &mut Vec::new())?;
        }
        self.entities = resolved;
        Ok(())
    }

    fn resolve_entity(
        &self,
        name: &str,
        resolved: &mut HashMap<String, String>,
        pending: &mut Vec<String>,
    ) -> Result<(), DtdError> {
        if resolved.contains_key(name) {
            return Ok(());
        }
        if pending.iter().any(|p| p == name) {
            return Err(DtdError::RecursiveEntity(name.to_string()));
        }
        let raw = self
            .entities
            .get(name)
            .ok_or_else(|| DtdError::UndefinedEntity(name.to_string()))?;
        if PREDEFINED_ENTITIES.iter().any(|(n, _)| *n == name) {
            resolved.insert(name.to_string(), raw.clone());
            return Ok(());
        }

        pending.push(name.to_string());
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw.as_str();
        while let Some(i) = rest.find('&') {
            out.push_str(&rest[..i]);
            let after = &rest[i + 1..];
            match reference_name(after) {
                Some(inner) => {
                    self.resolve_entity(inner, resolved, pending)?;
                    out.push_str(&resolved[inner]);
                    rest = &after[inner.len() + 1..];
                }
                None => {
                    out.push('&');
                    rest = after;
                }
            }
            if out.len() > MAX_ENTITY_LENGTH {
                return Err(DtdError::ExpansionLimit(format!("&{name};")));
            }
        }
        out.push_str(rest);
        pending.pop();
        resolved.insert(name.to_string(), out);
        Ok(())
    }

    /// Replace `%name;` references with their replacement text until none
    /// are left.
    fn expand_parameter_refs(&self, text: &str) -> Result<String, DtdError> {
        let mut current = text.to_string();
        for _ in 0..MAX_EXPANSION_ROUNDS {
            if !current.contains('%') {
                return Ok(current);
            }
            let mut out = String::with_capacity(current.len());
            let mut changed = false;
            let mut rest = current.as_str();
            while let Some(i) = rest.find('%') {
                out.push_str(&rest[..i]);
                let after = &rest[i + 1..];
                match reference_name(after) {
                    Some(name) => {
                        let value = self
                            .parameter_entities
                            .get(name)
                            .ok_or_else(|| DtdError::UndefinedParameterEntity(name.to_string()))?;
                        out.push(' ');
                        out.push_str(value);
                        out.push(' ');
                        rest = &after[name.len() + 1..];
                        changed = true;
                        if out.len() > MAX_ENTITY_LENGTH {
                            let snippet: String = text.trim().chars().take(40).collect();
                            return Err(DtdError::ExpansionLimit(snippet));
                        }
                    }
                    None => {
                        out.push('%');
                        rest = after;
                    }
                }
            }
            out.push_str(rest);
            if !changed {
                return Ok(out);
            }
            current = out;
        }
        let snippet: String = text.trim().chars().take(40).collect();
        Err(DtdError::RecursiveParameterEntity(snippet))
    }
}

// ---------------------------------------------------------------------------
// Lexical helpers
// ---------------------------------------------------------------------------

/// Index of the `>` closing a markup declaration, skipping quoted literals.
fn declaration_end(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '>' => return Some(i),
            None => {}
        }
    }
    None
}

/// Split a leading name off `s`; the name ends at whitespace or `(`.
fn split_name(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    let end = s
        .find(|c: char| c.is_whitespace() || c == '(')
        .unwrap_or(s.len());
    (&s[..end], &s[end..])
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == ':'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

/// If `after` (the text following a `%` or `&`) starts with `name;`, return
/// `name`.
fn reference_name(after: &str) -> Option<&str> {
    let end = after.find(';')?;
    let name = &after[..end];
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if is_name_start(c) && chars.all(is_name_char) => Some(name),
        _ => None,
    }
}

/// Expand `&#NNN;` and `&#xHH;`. Other references are left untouched.
fn expand_char_refs(text: &str) -> Result<String, DtdError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(i) = rest.find("&#") {
        out.push_str(&rest[..i]);
        let after = &rest[i + 2..];
        let end = after.find(';').ok_or_else(|| {
            DtdError::InvalidCharRef(format!("#{}", after.chars().take(8).collect::<String>()))
        })?;
        let digits = &after[..end];
        let code = match digits.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => digits.parse::<u32>().ok(),
        };
        let ch = code
            .and_then(char::from_u32)
            .ok_or_else(|| DtdError::InvalidCharRef(format!("#{digits}")))?;
        out.push(ch);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn group_values(group: &str) -> Vec<String> {
    group
        .trim_matches(|c: char| "()?*+".contains(c) || c.is_whitespace())
        .split('|')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    Quoted(&'a str),
    /// A parenthesised group including any trailing `?`, `*` or `+`.
    Group(&'a str),
}

struct Tokens<'a> {
    rest: &'a str,
}

impl<'a> Tokens<'a> {
    fn new(text: &'a str) -> Self {
        Tokens { rest: text }
    }
}

impl<'a> Iterator for Tokens<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        let s = self.rest.trim_start();
        let first = s.chars().next()?;
        match first {
            '"' | '\'' => {
                let body = &s[1..];
                let end = body.find(first)?;
                self.rest = &body[end + 1..];
                Some(Token::Quoted(&body[..end]))
            }
            '(' => {
                let mut depth = 0usize;
                let mut close = None;
                for (i, c) in s.char_indices() {
                    match c {
                        '(' => depth += 1,
                        ')' => {
                            depth -= 1;
                            if depth == 0 {
                                close = Some(i);
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                let mut end = close? + 1;
                while s[end..].starts_with(['?', '*', '+']) {
                    end += 1;
                }
                self.rest = &s[end..];
                Some(Token::Group(&s[..end]))
            }
            _ => {
                let end = s
                    .find(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '('))
                    .unwrap_or(s.len());
                self.rest = &s[end..];
                Some(Token::Word(&s[..end]))
            }
        }
    }
}
