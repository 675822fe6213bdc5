//! Interpreter for the solver's hash-calculation statements.
//!
//! The solver emits a handful of statement shapes: an optional `hval`
//! declaration, a `switch` over the length with fall-through cases that add
//! byte weights, and a final `return`. This module reads exactly that subset
//! into a small AST and evaluates it with C's 32-bit unsigned wrapping
//! arithmetic, which lets the generator check every trained key against the
//! result table before emitting anything. Anything outside the subset is
//! reported as [`Unsupported`] and the caller decides what to do.

use thiserror::Error;

/// The hash calculation uses a construct this interpreter does not model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported hash construct: {0}")]
pub struct Unsupported(pub String);

type ParseResult<T> = Result<T, Unsupported>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Ident(String),
    Num(u32),
    Punct(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Num(u32),
    Len,
    Hval,
    /// `str[i]`, a plain (signed) char read
    Byte(Box<Expr>),
    /// `(unsigned char)e`
    UChar(Box<Expr>),
    /// `asso_values[i]`
    Asso(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Stmt {
    Declare,
    Assign(Expr),
    AddAssign(Expr),
    Switch(Expr, Vec<SwitchItem>),
    Break,
    Return(Expr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SwitchItem {
    Case(u32),
    Default,
    Stmt(Stmt),
}

enum Flow {
    Normal,
    Break,
    Return(u32),
}

/// Parsed hash calculation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashProgram {
    stmts: Vec<Stmt>,
}

/// Inputs available to the hash calculation.
#[derive(Clone, Copy, Debug)]
pub struct HashInput<'a> {
    /// Key buffer; reads past its end yield 0
    pub buffer: &'a [u8],
    /// Value of `len`
    pub len: u32,
    /// Byte-weight table, if the solver emitted one
    pub asso: Option<&'a [u32]>,
}

impl HashProgram {
    /// Parse hash-calculation statements.
    pub fn parse(src: &str) -> ParseResult<Self> {
        let tokens = lex(src)?;
        let mut parser = Parser { tokens, pos: 0 };
        let mut stmts = Vec::new();
        while parser.peek().is_some() {
            stmts.push(parser.stmt()?);
        }
        if !stmts.iter().any(|s| matches!(s, Stmt::Return(_))) {
            return Err(Unsupported("no return statement".into()));
        }
        Ok(Self { stmts })
    }

    /// Evaluate the hash; `None` if it indexes outside the weight table.
    pub fn eval(&self, input: HashInput<'_>) -> Option<u32> {
        let mut hval = 0u32;
        match exec_block(&self.stmts, &input, &mut hval)? {
            Flow::Return(v) => Some(v),
            Flow::Normal | Flow::Break => None,
        }
    }
}

fn exec_block(stmts: &[Stmt], input: &HashInput<'_>, hval: &mut u32) -> Option<Flow> {
    for stmt in stmts {
        match exec(stmt, input, hval)? {
            Flow::Normal => {}
            flow => return Some(flow),
        }
    }
    Some(Flow::Normal)
}

fn exec(stmt: &Stmt, input: &HashInput<'_>, hval: &mut u32) -> Option<Flow> {
    match stmt {
        Stmt::Declare => {}
        Stmt::Assign(e) => *hval = eval(e, input, *hval)?,
        Stmt::AddAssign(e) => *hval = hval.wrapping_add(eval(e, input, *hval)?),
        Stmt::Break => return Some(Flow::Break),
        Stmt::Return(e) => return Some(Flow::Return(eval(e, input, *hval)?)),
        Stmt::Switch(scrutinee, items) => {
            let value = eval(scrutinee, input, *hval)?;
            let start = items
                .iter()
                .position(|i| *i == SwitchItem::Case(value))
                .or_else(|| items.iter().position(|i| *i == SwitchItem::Default));
            let Some(start) = start else {
                return Some(Flow::Normal);
            };
            for item in &items[start..] {
                if let SwitchItem::Stmt(s) = item {
                    match exec(s, input, hval)? {
                        Flow::Normal => {}
                        Flow::Break => break,
                        ret @ Flow::Return(_) => return Some(ret),
                    }
                }
            }
        }
    }
    Some(Flow::Normal)
}

fn eval(expr: &Expr, input: &HashInput<'_>, hval: u32) -> Option<u32> {
    Some(match expr {
        Expr::Num(n) => *n,
        Expr::Len => input.len,
        Expr::Hval => hval,
        Expr::Byte(idx) => {
            let i = eval(idx, input, hval)? as usize;
            let b = input.buffer.get(i).copied().unwrap_or(0);
            i32::from(b as i8) as u32
        }
        Expr::UChar(e) => eval(e, input, hval)? & 0xff,
        Expr::Asso(idx) => {
            let i = eval(idx, input, hval)? as usize;
            *input.asso?.get(i)?
        }
        Expr::Add(a, b) => eval(a, input, hval)?.wrapping_add(eval(b, input, hval)?),
        Expr::Sub(a, b) => eval(a, input, hval)?.wrapping_sub(eval(b, input, hval)?),
    })
}

const TYPE_WORDS: &[&str] = &[
    "register", "unsigned", "signed", "int", "char", "short", "long", "const",
];

fn lex(src: &str) -> ParseResult<Vec<Tok>> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
        } else if src[i..].starts_with("/*") {
            let end = src[i + 2..]
                .find("*/")
                .ok_or_else(|| Unsupported("unterminated comment".into()))?;
            i += end + 4;
        } else if src[i..].starts_with("//") {
            i = src[i..].find('\n').map_or(bytes.len(), |p| i + p);
        } else if c.is_ascii_alphabetic() || c == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            tokens.push(Tok::Ident(src[start..i].to_string()));
        } else if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_alphanumeric() {
                i += 1;
            }
            let text = src[start..i].trim_end_matches(|c| c == 'u' || c == 'U');
            let n = text
                .parse()
                .map_err(|_| Unsupported(format!("number `{}`", &src[start..i])))?;
            tokens.push(Tok::Num(n));
        } else if src[i..].starts_with("+=") {
            tokens.push(Tok::Punct("+="));
            i += 2;
        } else {
            let p = match c {
                b'(' => "(",
                b')' => ")",
                b'[' => "[",
                b']' => "]",
                b'{' => "{",
                b'}' => "}",
                b';' => ";",
                b':' => ":",
                b'+' => "+",
                b'-' => "-",
                b'=' => "=",
                _ => return Err(Unsupported(format!("character `{}`", c as char))),
            };
            tokens.push(Tok::Punct(p));
            i += 1;
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn peek_ident(&self) -> Option<&str> {
        match self.peek() {
            Some(Tok::Ident(s)) => Some(s),
            _ => None,
        }
    }

    fn next(&mut self) -> ParseResult<Tok> {
        let tok = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| Unsupported("unexpected end of input".into()))?;
        self.pos += 1;
        Ok(tok)
    }

    fn eat(&mut self, p: &'static str) -> bool {
        if self.peek() == Some(&Tok::Punct(p)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, p: &'static str) -> ParseResult<()> {
        if self.eat(p) {
            Ok(())
        } else {
            Err(Unsupported(format!("expected `{}` near {:?}", p, self.peek())))
        }
    }

    fn stmt(&mut self) -> ParseResult<Stmt> {
        let word = self
            .peek_ident()
            .ok_or_else(|| Unsupported(format!("statement starting with {:?}", self.peek())))?
            .to_string();
        match word.as_str() {
            "switch" => {
                self.pos += 1;
                self.expect("(")?;
                let scrutinee = self.expr()?;
                self.expect(")")?;
                self.expect("{")?;
                let mut items = Vec::new();
                while !self.eat("}") {
                    match self.peek_ident() {
                        Some("case") => {
                            self.pos += 1;
                            let Tok::Num(n) = self.next()? else {
                                return Err(Unsupported("non-numeric case label".into()));
                            };
                            self.expect(":")?;
                            items.push(SwitchItem::Case(n));
                        }
                        Some("default") => {
                            self.pos += 1;
                            self.expect(":")?;
                            items.push(SwitchItem::Default);
                        }
                        _ => items.push(SwitchItem::Stmt(self.stmt()?)),
                    }
                }
                Ok(Stmt::Switch(scrutinee, items))
            }
            "break" => {
                self.pos += 1;
                self.expect(";")?;
                Ok(Stmt::Break)
            }
            "return" => {
                self.pos += 1;
                let e = self.expr()?;
                self.expect(";")?;
                Ok(Stmt::Return(e))
            }
            "hval" => {
                self.pos += 1;
                let stmt = if self.eat("=") {
                    Stmt::Assign(self.expr()?)
                } else if self.eat("+=") {
                    Stmt::AddAssign(self.expr()?)
                } else {
                    return Err(Unsupported("hval update other than = or +=".into()));
                };
                self.expect(";")?;
                Ok(stmt)
            }
            w if TYPE_WORDS.contains(&w) => {
                while self.peek_ident().map_or(false, |w| TYPE_WORDS.contains(&w)) {
                    self.pos += 1;
                }
                if self.peek_ident() != Some("hval") {
                    return Err(Unsupported("declaration of something other than hval".into()));
                }
                self.pos += 1;
                let stmt = if self.eat("=") {
                    Stmt::Assign(self.expr()?)
                } else {
                    Stmt::Declare
                };
                self.expect(";")?;
                Ok(stmt)
            }
            other => Err(Unsupported(format!("statement `{}`", other))),
        }
    }

    fn expr(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.primary()?;
        loop {
            if self.eat("+") {
                lhs = Expr::Add(Box::new(lhs), Box::new(self.primary()?));
            } else if self.eat("-") {
                lhs = Expr::Sub(Box::new(lhs), Box::new(self.primary()?));
            } else {
                return Ok(lhs);
            }
        }
    }

    fn index(&mut self) -> ParseResult<Expr> {
        self.expect("[")?;
        let e = self.expr()?;
        self.expect("]")?;
        Ok(e)
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        match self.next()? {
            Tok::Num(n) => Ok(Expr::Num(n)),
            Tok::Ident(name) => match name.as_str() {
                "len" => Ok(Expr::Len),
                "hval" => Ok(Expr::Hval),
                "str" => Ok(Expr::Byte(Box::new(self.index()?))),
                "asso_values" => Ok(Expr::Asso(Box::new(self.index()?))),
                other => Err(Unsupported(format!("identifier `{}`", other))),
            },
            Tok::Punct("(") => {
                if self.peek_ident().map_or(false, |w| TYPE_WORDS.contains(&w)) {
                    let mut words = Vec::new();
                    while let Some(w) = self.peek_ident().filter(|w| TYPE_WORDS.contains(w)) {
                        words.push(w.to_string());
                        self.pos += 1;
                    }
                    self.expect(")")?;
                    let inner = self.primary()?;
                    let narrowing = words.iter().any(|w| w == "char");
                    let unsigned = words.iter().any(|w| w == "unsigned");
                    return match (narrowing, unsigned) {
                        (true, true) => Ok(Expr::UChar(Box::new(inner))),
                        (false, _) => Ok(inner),
                        (true, false) => Err(Unsupported("signed char cast".into())),
                    };
                }
                let e = self.expr()?;
                self.expect(")")?;
                Ok(e)
            }
            tok => Err(Unsupported(format!("token {:?} in expression", tok))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights() -> Vec<u32> {
        (0..256u32).map(|i| i % 7).collect()
    }

    fn run(src: &str, buf: &[u8]) -> Option<u32> {
        let asso = weights();
        HashProgram::parse(src).unwrap().eval(HashInput {
            buffer: buf,
            len: buf.len() as u32,
            asso: Some(&asso),
        })
    }

    #[test]
    fn single_position() {
        let src = "  return asso_values[(unsigned char)str[0]];";
        assert_eq!(run(src, b"R"), Some(u32::from(b'R') % 7));
    }

    #[test]
    fn length_plus_positions() {
        let src = "  return len + asso_values[(unsigned char)str[1]+1] + asso_values[(unsigned char)str[len - 1]];";
        let w = |b: u8| u32::from(b) % 7;
        assert_eq!(run(src, b"abcd"), Some(4 + (u32::from(b'b') + 1) % 7 + w(b'd')));
    }

    #[test]
    fn switch_fall_through() {
        let src = r#"
  register unsigned int hval = len;

  switch (hval)
    {
      default:
        hval += asso_values[(unsigned char)str[2]];
      /*FALLTHROUGH*/
      case 2:
      case 1:
        hval += asso_values[(unsigned char)str[0]];
        break;
    }
  return hval + asso_values[(unsigned char)str[len - 1]];"#;
        let w = |b: u8| u32::from(b) % 7;
        assert_eq!(run(src, b"xyz"), Some(3 + w(b'z') + w(b'x') + w(b'z')));
        assert_eq!(run(src, b"xy"), Some(2 + w(b'x') + w(b'y')));
    }

    #[test]
    fn switch_without_matching_case() {
        let src = "register unsigned int hval = len; switch (hval) { case 9: hval += 100; break; } return hval;";
        assert_eq!(run(src, b"ab"), Some(2));
    }

    #[test]
    fn out_of_table_is_none() {
        let program = HashProgram::parse("return asso_values[(unsigned char)str[0] + 300];").unwrap();
        let asso = weights();
        let input = HashInput {
            buffer: b"a",
            len: 1,
            asso: Some(&asso),
        };
        assert_eq!(program.eval(input), None);
        let no_table = HashInput { asso: None, ..input };
        assert_eq!(HashProgram::parse("return asso_values[0];").unwrap().eval(no_table), None);
    }

    #[test]
    fn reads_past_buffer_as_zero() {
        assert_eq!(run("return asso_values[(unsigned char)str[5]];", b"a"), Some(0));
    }

    #[test]
    fn rejects_unknown_constructs() {
        assert!(HashProgram::parse("return str[0] * 3;").is_err());
        assert!(HashProgram::parse("hval = 3;").is_err());
        assert!(HashProgram::parse("return lookup(str);").is_err());
    }
}
