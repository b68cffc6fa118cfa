//! Tokenizer for query programs

use std::rc::Rc;

use super::error::EvalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Const,
    Let,
    Var,
    If,
    Else,
    For,
    In,
    While,
    Do,
    Break,
    Continue,
    Return,
    Function,
    True,
    False,
    Null,
    TypeOf,
    Void,
    New,
    Throw,
    Try,
    Catch,
    Finally,
    InstanceOf,
}

impl Keyword {
    fn from_ident(ident: &str) -> Option<Self> {
        let keyword = match ident {
            "const" => Keyword::Const,
            "let" => Keyword::Let,
            "var" => Keyword::Var,
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "for" => Keyword::For,
            "in" => Keyword::In,
            "while" => Keyword::While,
            "do" => Keyword::Do,
            "break" => Keyword::Break,
            "continue" => Keyword::Continue,
            "return" => Keyword::Return,
            "function" => Keyword::Function,
            "true" => Keyword::True,
            "false" => Keyword::False,
            "null" => Keyword::Null,
            "typeof" => Keyword::TypeOf,
            "void" => Keyword::Void,
            "new" => Keyword::New,
            "throw" => Keyword::Throw,
            "try" => Keyword::Try,
            "catch" => Keyword::Catch,
            "finally" => Keyword::Finally,
            "instanceof" => Keyword::InstanceOf,
            _ => return None,
        };
        Some(keyword)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::Const => "const",
            Keyword::Let => "let",
            Keyword::Var => "var",
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::For => "for",
            Keyword::In => "in",
            Keyword::While => "while",
            Keyword::Do => "do",
            Keyword::Break => "break",
            Keyword::Continue => "continue",
            Keyword::Return => "return",
            Keyword::Function => "function",
            Keyword::True => "true",
            Keyword::False => "false",
            Keyword::Null => "null",
            Keyword::TypeOf => "typeof",
            Keyword::Void => "void",
            Keyword::New => "new",
            Keyword::Throw => "throw",
            Keyword::Try => "try",
            Keyword::Catch => "catch",
            Keyword::Finally => "finally",
            Keyword::InstanceOf => "instanceof",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Semicolon,
    Colon,
    Dot,
    QuestionDot,
    Question,
    QuestionQuestion,
    Arrow,
    Ellipsis,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    Bang,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    StarStarAssign,
    SlashAssign,
    PercentAssign,
    AndAndAssign,
    OrOrAssign,
    QuestionQuestionAssign,
    EqEq,
    EqEqEq,
    NotEq,
    NotEqEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    AndAnd,
    OrOr,
}

impl Punct {
    pub fn as_str(self) -> &'static str {
        match self {
            Punct::LParen => "(",
            Punct::RParen => ")",
            Punct::LBracket => "[",
            Punct::RBracket => "]",
            Punct::LBrace => "{",
            Punct::RBrace => "}",
            Punct::Comma => ",",
            Punct::Semicolon => ";",
            Punct::Colon => ":",
            Punct::Dot => ".",
            Punct::QuestionDot => "?.",
            Punct::Question => "?",
            Punct::QuestionQuestion => "??",
            Punct::Arrow => "=>",
            Punct::Ellipsis => "...",
            Punct::Plus => "+",
            Punct::Minus => "-",
            Punct::Star => "*",
            Punct::StarStar => "**",
            Punct::Slash => "/",
            Punct::Percent => "%",
            Punct::PlusPlus => "++",
            Punct::MinusMinus => "--",
            Punct::Bang => "!",
            Punct::Assign => "=",
            Punct::PlusAssign => "+=",
            Punct::MinusAssign => "-=",
            Punct::StarAssign => "*=",
            Punct::StarStarAssign => "**=",
            Punct::SlashAssign => "/=",
            Punct::PercentAssign => "%=",
            Punct::AndAndAssign => "&&=",
            Punct::OrOrAssign => "||=",
            Punct::QuestionQuestionAssign => "??=",
            Punct::EqEq => "==",
            Punct::EqEqEq => "===",
            Punct::NotEq => "!=",
            Punct::NotEqEq => "!==",
            Punct::Lt => "<",
            Punct::Gt => ">",
            Punct::LtEq => "<=",
            Punct::GtEq => ">=",
            Punct::AndAnd => "&&",
            Punct::OrOr => "||",
        }
    }
}

// Longest first so that greedy matching picks `===` over `==` over `=`.
const PUNCTUATORS: &[(&str, Punct)] = &[
    ("...", Punct::Ellipsis),
    ("===", Punct::EqEqEq),
    ("!==", Punct::NotEqEq),
    ("**=", Punct::StarStarAssign),
    ("&&=", Punct::AndAndAssign),
    ("||=", Punct::OrOrAssign),
    ("??=", Punct::QuestionQuestionAssign),
    ("=>", Punct::Arrow),
    ("==", Punct::EqEq),
    ("!=", Punct::NotEq),
    ("<=", Punct::LtEq),
    (">=", Punct::GtEq),
    ("&&", Punct::AndAnd),
    ("||", Punct::OrOr),
    ("??", Punct::QuestionQuestion),
    ("?.", Punct::QuestionDot),
    ("++", Punct::PlusPlus),
    ("--", Punct::MinusMinus),
    ("+=", Punct::PlusAssign),
    ("-=", Punct::MinusAssign),
    ("*=", Punct::StarAssign),
    ("/=", Punct::SlashAssign),
    ("%=", Punct::PercentAssign),
    ("**", Punct::StarStar),
    ("(", Punct::LParen),
    (")", Punct::RParen),
    ("[", Punct::LBracket),
    ("]", Punct::RBracket),
    ("{", Punct::LBrace),
    ("}", Punct::RBrace),
    (",", Punct::Comma),
    (";", Punct::Semicolon),
    (":", Punct::Colon),
    (".", Punct::Dot),
    ("?", Punct::Question),
    ("+", Punct::Plus),
    ("-", Punct::Minus),
    ("*", Punct::Star),
    ("/", Punct::Slash),
    ("%", Punct::Percent),
    ("!", Punct::Bang),
    ("=", Punct::Assign),
    ("<", Punct::Lt),
    (">", Punct::Gt),
];

/// Raw piece of a template literal; expression sources are parsed later.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateChunk {
    Str(String),
    Expr(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    String(Rc<str>),
    Template(Vec<TemplateChunk>),
    Regex { pattern: Rc<str>, flags: Rc<str> },
    Ident(Rc<str>),
    Keyword(Keyword),
    Punct(Punct),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// A line terminator precedes this token (drives semicolon insertion).
    pub newline_before: bool,
}

impl Token {
    pub fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Number(_) => "number".to_string(),
            TokenKind::String(_) => "string".to_string(),
            TokenKind::Template(_) => "template string".to_string(),
            TokenKind::Regex { .. } => "regular expression".to_string(),
            TokenKind::Ident(_) => "identifier".to_string(),
            TokenKind::Keyword(k) => format!("token '{}'", k.as_str()),
            TokenKind::Punct(p) => format!("token '{}'", p.as_str()),
            TokenKind::Eof => "end of input".to_string(),
        }
    }
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, EvalError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn run(mut self) -> Result<Vec<Token>, EvalError> {
        loop {
            let newline_before = self.skip_trivia()?;
            let Some(c) = self.peek() else {
                self.tokens.push(Token {
                    kind: TokenKind::Eof,
                    newline_before: true,
                });
                return Ok(self.tokens);
            };

            let kind = if c.is_ascii_digit() || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) {
                self.number()?
            } else if c == '"' || c == '\'' {
                self.pos += 1;
                TokenKind::String(self.string(c)?.into())
            } else if c == '`' {
                self.pos += 1;
                self.template()?
            } else if is_ident_start(c) {
                self.ident_or_keyword()
            } else if c == '/' && self.regex_allowed() {
                self.regex()?
            } else {
                self.punct()?
            };

            self.tokens.push(Token { kind, newline_before });
        }
    }

    /// Skips whitespace and comments, reporting whether a line break was crossed.
    fn skip_trivia(&mut self) -> Result<bool, EvalError> {
        let mut newline = self.tokens.is_empty();
        while let Some(c) = self.peek() {
            if c == '\n' || c == '\r' || c == '\u{2028}' || c == '\u{2029}' {
                newline = true;
                self.pos += 1;
            } else if c.is_whitespace() || c == '\u{feff}' {
                self.pos += 1;
            } else if c == '/' && self.peek_at(1) == Some('/') {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.pos += 1;
                }
            } else if c == '/' && self.peek_at(1) == Some('*') {
                self.pos += 2;
                loop {
                    match self.peek() {
                        None => return Err(syntax("Invalid or unexpected token")),
                        Some('*') if self.peek_at(1) == Some('/') => {
                            self.pos += 2;
                            break;
                        }
                        Some(c) => {
                            if c == '\n' {
                                newline = true;
                            }
                            self.pos += 1;
                        }
                    }
                }
            } else {
                break;
            }
        }
        Ok(newline)
    }

    fn regex_allowed(&self) -> bool {
        match self.tokens.last().map(|t| &t.kind) {
            None => true,
            Some(TokenKind::Punct(p)) => !matches!(p, Punct::RParen | Punct::RBracket | Punct::RBrace),
            Some(TokenKind::Keyword(k)) => !matches!(k, Keyword::True | Keyword::False | Keyword::Null),
            Some(_) => false,
        }
    }

    fn number(&mut self) -> Result<TokenKind, EvalError> {
        let start = self.pos;
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x' | 'X' | 'b' | 'B' | 'o' | 'O')) {
            let radix = match self.peek_at(1) {
                Some('x' | 'X') => 16,
                Some('b' | 'B') => 2,
                _ => 8,
            };
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_digit(radix)) {
                self.pos += 1;
            }
            let digits: String = self.chars[digits_start..self.pos].iter().collect();
            let value = u64::from_str_radix(&digits, radix).map_err(|_| syntax("Invalid or unexpected token"))?;
            return self.finish_number(value as f64);
        }

        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some('.') {
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let save = self.pos;
            self.pos += 1;
            if matches!(self.peek(), Some('+' | '-')) {
                self.pos += 1;
            }
            if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            } else {
                self.pos = save;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let value: f64 = text.parse().map_err(|_| syntax("Invalid or unexpected token"))?;
        self.finish_number(value)
    }

    fn finish_number(&mut self, value: f64) -> Result<TokenKind, EvalError> {
        if self.peek().is_some_and(is_ident_start) {
            return Err(syntax("Invalid or unexpected token"));
        }
        Ok(TokenKind::Number(value))
    }

    fn string(&mut self, quote: char) -> Result<String, EvalError> {
        let mut out = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => return Err(syntax("Invalid or unexpected token")),
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some('\\') => {
                    self.pos += 1;
                    self.escape(&mut out)?;
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn escape(&mut self, out: &mut String) -> Result<(), EvalError> {
        let Some(c) = self.peek() else {
            return Err(syntax("Invalid or unexpected token"));
        };
        self.pos += 1;
        match c {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '0' if !self.peek().is_some_and(|d| d.is_ascii_digit()) => out.push('\0'),
            'x' => {
                let code = self.hex_digits(2)?;
                out.push(char::from_u32(code).ok_or_else(|| syntax("Invalid hexadecimal escape sequence"))?);
            }
            'u' => {
                let code = if self.peek() == Some('{') {
                    self.pos += 1;
                    let start = self.pos;
                    while self.peek().is_some_and(|c| c != '}') {
                        self.pos += 1;
                    }
                    let digits: String = self.chars[start..self.pos].iter().collect();
                    self.pos += 1;
                    u32::from_str_radix(&digits, 16).map_err(|_| syntax("Invalid Unicode escape sequence"))?
                } else {
                    self.hex_digits(4)?
                };
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            '\r' => {
                if self.peek() == Some('\n') {
                    self.pos += 1;
                }
            }
            '\n' | '\u{2028}' | '\u{2029}' => {}
            other => out.push(other),
        }
        Ok(())
    }

    fn hex_digits(&mut self, count: usize) -> Result<u32, EvalError> {
        if self.pos + count > self.chars.len() {
            return Err(syntax("Invalid Unicode escape sequence"));
        }
        let digits: String = self.chars[self.pos..self.pos + count].iter().collect();
        self.pos += count;
        u32::from_str_radix(&digits, 16).map_err(|_| syntax("Invalid Unicode escape sequence"))
    }

    fn template(&mut self) -> Result<TokenKind, EvalError> {
        let mut chunks = Vec::new();
        let mut current = String::new();
        loop {
            match self.peek() {
                None => return Err(syntax("Unterminated template literal")),
                Some('`') => {
                    self.pos += 1;
                    chunks.push(TemplateChunk::Str(current));
                    return Ok(TokenKind::Template(chunks));
                }
                Some('\\') => {
                    self.pos += 1;
                    self.escape(&mut current)?;
                }
                Some('$') if self.peek_at(1) == Some('{') => {
                    self.pos += 2;
                    chunks.push(TemplateChunk::Str(std::mem::take(&mut current)));
                    chunks.push(TemplateChunk::Expr(self.template_expr()?));
                }
                Some(c) => {
                    current.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    /// Collects the source of a `${...}` substitution up to its matching brace.
    fn template_expr(&mut self) -> Result<String, EvalError> {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            match c {
                '{' => depth += 1,
                '}' if depth == 0 => {
                    let source: String = self.chars[start..self.pos].iter().collect();
                    self.pos += 1;
                    return Ok(source);
                }
                '}' => depth -= 1,
                '"' | '\'' => {
                    self.pos += 1;
                    self.string(c)?;
                    continue;
                }
                '`' => {
                    self.pos += 1;
                    self.template()?;
                    continue;
                }
                _ => {}
            }
            self.pos += 1;
        }
        Err(syntax("Unterminated template literal"))
    }

    fn ident_or_keyword(&mut self) -> TokenKind {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_part) {
            self.pos += 1;
        }
        let ident: String = self.chars[start..self.pos].iter().collect();
        match Keyword::from_ident(&ident) {
            Some(keyword) => TokenKind::Keyword(keyword),
            None => TokenKind::Ident(ident.into()),
        }
    }

    fn regex(&mut self) -> Result<TokenKind, EvalError> {
        self.pos += 1;
        let mut pattern = String::new();
        let mut in_class = false;
        loop {
            match self.peek() {
                None | Some('\n') => return Err(syntax("Invalid regular expression: missing /")),
                Some('\\') => {
                    pattern.push('\\');
                    self.pos += 1;
                    if let Some(c) = self.peek() {
                        pattern.push(c);
                        self.pos += 1;
                    }
                }
                Some('[') => {
                    in_class = true;
                    pattern.push('[');
                    self.pos += 1;
                }
                Some(']') => {
                    in_class = false;
                    pattern.push(']');
                    self.pos += 1;
                }
                Some('/') if !in_class => {
                    self.pos += 1;
                    break;
                }
                Some(c) => {
                    pattern.push(c);
                    self.pos += 1;
                }
            }
        }
        let start = self.pos;
        while self.peek().is_some_and(is_ident_part) {
            self.pos += 1;
        }
        let flags: String = self.chars[start..self.pos].iter().collect();
        Ok(TokenKind::Regex {
            pattern: pattern.into(),
            flags: flags.into(),
        })
    }

    fn punct(&mut self) -> Result<TokenKind, EvalError> {
        for (text, punct) in PUNCTUATORS {
            let len = text.chars().count();
            if self.pos + len > self.chars.len() {
                continue;
            }
            if self.chars[self.pos..self.pos + len].iter().copied().eq(text.chars()) {
                // `a?.5:b` is a conditional, not optional chaining
                if *punct == Punct::QuestionDot && self.peek_at(2).is_some_and(|c| c.is_ascii_digit()) {
                    continue;
                }
                self.pos += len;
                return Ok(TokenKind::Punct(*punct));
            }
        }
        Err(syntax("Invalid or unexpected token"))
    }
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphabetic()
}

fn is_ident_part(c: char) -> bool {
    is_ident_start(c) || c.is_ascii_digit() || c == '\u{200c}' || c == '\u{200d}'
}

fn syntax(message: &str) -> EvalError {
    EvalError::Syntax(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_tokenize_call() {
        let tokens = kinds("findByType('TEXT')");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Ident("findByType".into()),
                TokenKind::Punct(Punct::LParen),
                TokenKind::String("TEXT".into()),
                TokenKind::Punct(Punct::RParen),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_greedy_punctuators() {
        let tokens = kinds("a === b ?? c?.d => ...e");
        assert!(tokens.contains(&TokenKind::Punct(Punct::EqEqEq)));
        assert!(tokens.contains(&TokenKind::Punct(Punct::QuestionQuestion)));
        assert!(tokens.contains(&TokenKind::Punct(Punct::QuestionDot)));
        assert!(tokens.contains(&TokenKind::Punct(Punct::Arrow)));
        assert!(tokens.contains(&TokenKind::Punct(Punct::Ellipsis)));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("0x1F")[0], TokenKind::Number(31.0));
        assert_eq!(kinds("1.5e2")[0], TokenKind::Number(150.0));
        assert_eq!(kinds(".25")[0], TokenKind::Number(0.25));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(kinds(r#""a\nbA""#)[0], TokenKind::String("a\nbA".into()));
        assert_eq!(kinds(r"'it\'s'")[0], TokenKind::String("it's".into()));
    }

    #[test]
    fn test_template_chunks() {
        let tokens = kinds("`Hi ${n.name}!`");
        assert_eq!(
            tokens[0],
            TokenKind::Template(vec![
                TemplateChunk::Str("Hi ".into()),
                TemplateChunk::Expr("n.name".into()),
                TemplateChunk::Str("!".into()),
            ])
        );
    }

    #[test]
    fn test_regex_versus_division() {
        let tokens = kinds("a / b");
        assert_eq!(tokens[1], TokenKind::Punct(Punct::Slash));

        let tokens = kinds("x.match(/but+on/i)");
        assert!(tokens.contains(&TokenKind::Regex {
            pattern: "but+on".into(),
            flags: "i".into(),
        }));
    }

    #[test]
    fn test_newline_tracking() {
        let tokens = tokenize("a\nb").unwrap();
        assert!(tokens[1].newline_before);
        let tokens = tokenize("a b").unwrap();
        assert!(!tokens[1].newline_before);
    }

    #[test]
    fn test_comments_skipped() {
        let tokens = kinds("a // trailing\n/* block */ b");
        assert_eq!(tokens.len(), 3);
    }

    #[test]
    fn test_unterminated_string() {
        assert!(matches!(tokenize("'abc"), Err(EvalError::Syntax(_))));
    }
}
