use crate::atom_table::*;
use crate::parser::ast::*;
use crate::parser::put_back_n::*;

use std::fmt;

macro_rules! layout_char {
    ($c:expr) => {
        matches!($c, ' ' | '\t' | '\n' | '\r' | '\u{0b}' | '\u{0c}')
    };
}

macro_rules! new_line_char {
    ($c:expr) => {
        $c == '\n'
    };
}

macro_rules! alpha_numeric_char {
    ($c:expr) => {
        $c.is_alphanumeric() || $c == '_'
    };
}

macro_rules! variable_indicator_char {
    ($c:expr) => {
        $c == '_'
    };
}

macro_rules! capital_letter_char {
    ($c:expr) => {
        $c.is_uppercase()
    };
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Literal(Constant),
    Var(String),
    String(String),
    Open,              // '('
    OpenCT,            // '(' immediately after a name
    Close,             // ')'
    OpenList,          // '['
    CloseList,         // ']'
    OpenCurly,         // '{'
    CloseCurly,        // '}'
    HeadTailSeparator, // '|'
    Comma,             // ','
    End,
}

impl Token {
    #[inline]
    pub(super) fn is_end(&self) -> bool {
        matches!(self, Token::End)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Literal(c) => write!(f, "{}", c),
            Token::Var(v) => write!(f, "{}", v),
            Token::String(s) => write!(f, "{:?}", s),
            Token::Open | Token::OpenCT => write!(f, "("),
            Token::Close => write!(f, ")"),
            Token::OpenList => write!(f, "["),
            Token::CloseList => write!(f, "]"),
            Token::OpenCurly => write!(f, "{{"),
            Token::CloseCurly => write!(f, "}}"),
            Token::HeadTailSeparator => write!(f, "|"),
            Token::Comma => write!(f, ","),
            Token::End => write!(f, "."),
        }
    }
}

pub struct Lexer<R: Iterator<Item = char>> {
    pub(crate) reader: PutBackN<R>,
    pub(crate) line_num: usize,
    pub(crate) col_num: usize,
    /// Where the last token read began.
    pub(crate) token_start: (usize, usize),
}

impl<R: Iterator<Item = char>> Lexer<R> {
    pub fn new(src: R) -> Self {
        Lexer {
            reader: put_back_n(src),
            line_num: 1,
            col_num: 0,
            token_start: (1, 0),
        }
    }

    #[inline]
    pub fn lookahead_char(&mut self) -> Result<char, ParserError> {
        match self.reader.peek() {
            Some(&c) => Ok(c),
            None => Err(ParserError::UnexpectedEOF(self.line_num)),
        }
    }

    pub fn read_char(&mut self) -> Result<char, ParserError> {
        let c = self.lookahead_char()?;
        self.skip_char(c);
        Ok(c)
    }

    #[inline]
    fn return_char(&mut self, c: char) {
        self.reader.put_back(c);

        if new_line_char!(c) {
            self.line_num -= 1;
        } else {
            self.col_num = self.col_num.saturating_sub(1);
        }
    }

    pub fn skip_char(&mut self, c: char) {
        self.reader.next();

        if new_line_char!(c) {
            self.line_num += 1;
            self.col_num = 0;
        } else {
            self.col_num += 1;
        }
    }

    fn single_line_comment(&mut self) {
        while let Some(&c) = self.reader.peek() {
            self.skip_char(c);

            if new_line_char!(c) {
                break;
            }
        }
    }

    fn bracketed_comment(&mut self) -> Result<bool, ParserError> {
        self.skip_char('/');

        match self.reader.peek() {
            Some(&'*') => {
                self.skip_char('*');
            }
            _ => {
                self.return_char('/');
                return Ok(false);
            }
        }

        let mut prev = ' ';

        loop {
            let c = match self.read_char() {
                Ok(c) => c,
                Err(_) => return Err(ParserError::IncompleteReduction(self.line_num, self.col_num)),
            };

            if prev == '*' && c == '/' {
                return Ok(true);
            }

            prev = c;
        }
    }

    /// Skips layout text and comments, reporting whether any was
    /// consumed.
    pub fn scan_for_layout(&mut self) -> Result<bool, ParserError> {
        let mut inserted = false;

        loop {
            match self.reader.peek() {
                Some(&c) if layout_char!(c) => {
                    self.skip_char(c);
                    inserted = true;
                }
                Some(&'%') => {
                    self.single_line_comment();
                    inserted = true;
                }
                Some(&'/') => {
                    if self.bracketed_comment()? {
                        inserted = true;
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        }

        Ok(inserted)
    }

    /// True once only layout text remains.
    pub fn at_eof(&mut self) -> Result<bool, ParserError> {
        self.scan_for_layout()?;
        Ok(self.reader.peek().is_none())
    }

    fn escape_sequence_to_char(&mut self) -> Result<Option<char>, ParserError> {
        let c = self.read_char()?;

        Ok(Some(match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            'a' => '\u{07}',
            'b' => '\u{08}',
            'f' => '\u{0c}',
            'v' => '\u{0b}',
            'e' => '\u{1b}',
            's' => ' ',
            '0'..='7' => {
                let mut code = c.to_digit(8).unwrap_or(0);

                loop {
                    let d = self.read_char()?;

                    match d.to_digit(8) {
                        Some(n) => code = code * 8 + n,
                        None if d == '\\' => break,
                        None => return Err(ParserError::InvalidEscape(self.line_num, self.col_num)),
                    }
                }

                char::from_u32(code)
                    .ok_or(ParserError::InvalidEscape(self.line_num, self.col_num))?
            }
            'x' => {
                let mut code = 0u32;

                loop {
                    let d = self.read_char()?;

                    match d.to_digit(16) {
                        Some(n) => code = code.wrapping_mul(16).wrapping_add(n),
                        None if d == '\\' => break,
                        None => return Err(ParserError::InvalidEscape(self.line_num, self.col_num)),
                    }
                }

                char::from_u32(code)
                    .ok_or(ParserError::InvalidEscape(self.line_num, self.col_num))?
            }
            '\n' => return Ok(None), // continuation line
            '\\' | '\'' | '"' | '`' => c,
            _ => return Err(ParserError::InvalidEscape(self.line_num, self.col_num)),
        }))
    }

    fn quoted_text(&mut self, delim: char) -> Result<String, ParserError> {
        let (start_line, start_col) = (self.line_num, self.col_num);
        self.skip_char(delim);

        let mut text = String::new();

        loop {
            let c = match self.read_char() {
                Ok(c) => c,
                Err(_) => return Err(ParserError::MissingQuote(start_line, start_col)),
            };

            if c == delim {
                if self.reader.peek() == Some(&delim) {
                    self.skip_char(delim);
                    text.push(delim);
                } else {
                    return Ok(text);
                }
            } else if c == '\\' {
                if let Some(c) = self.escape_sequence_to_char()? {
                    text.push(c);
                }
            } else {
                text.push(c);
            }
        }
    }

    fn variable_token(&mut self) -> Result<Token, ParserError> {
        let mut s = String::new();

        while let Some(&c) = self.reader.peek() {
            if alpha_numeric_char!(c) {
                self.skip_char(c);
                s.push(c);
            } else {
                break;
            }
        }

        Ok(Token::Var(s))
    }

    fn name_token(&mut self, c: char) -> Result<Token, ParserError> {
        let mut token = String::new();

        if c.is_alphabetic() {
            while let Some(&c) = self.reader.peek() {
                if alpha_numeric_char!(c) {
                    self.skip_char(c);
                    token.push(c);
                } else {
                    break;
                }
            }
        } else if is_symbol_char(c) {
            while let Some(&c) = self.reader.peek() {
                if is_symbol_char(c) {
                    self.skip_char(c);
                    token.push(c);
                } else {
                    break;
                }
            }
        } else if c == '\'' {
            token = self.quoted_text('\'')?;
        } else if c == '!' || c == ';' {
            self.skip_char(c);
            token.push(c);
        } else {
            return Err(ParserError::UnexpectedChar(c, self.line_num, self.col_num));
        }

        Ok(Token::Literal(Constant::Atom(Atom::from(token))))
    }

    fn digits(&mut self, radix: u32, into: &mut String) {
        while let Some(&c) = self.reader.peek() {
            if c.is_digit(radix) {
                self.skip_char(c);
                into.push(c);
            } else if c == '_' {
                self.skip_char(c);

                match self.reader.peek() {
                    Some(&d) if d.is_digit(radix) => {}
                    _ => {
                        self.return_char('_');
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn radix_constant(&mut self, radix: u32) -> Result<Token, ParserError> {
        let mut token = String::new();
        self.digits(radix, &mut token);

        i64::from_str_radix(&token, radix)
            .map(|n| Token::Literal(Constant::Fixnum(n)))
            .map_err(|_| ParserError::ParseNumber(self.line_num, self.col_num))
    }

    pub fn number_token(&mut self, leading_c: char) -> Result<Token, ParserError> {
        let mut token = String::new();

        if leading_c == '0' {
            self.skip_char('0');

            match self.reader.peek().cloned() {
                Some('\'') => {
                    self.skip_char('\'');
                    let c = self.read_char()?;

                    let code = match c {
                        '\\' => match self.escape_sequence_to_char()? {
                            Some(c) => c,
                            None => return Err(ParserError::InvalidEscape(self.line_num, self.col_num)),
                        },
                        '\'' => {
                            // 0''' and 0'' both denote the quote character
                            if self.reader.peek() == Some(&'\'') {
                                self.skip_char('\'');
                            }

                            '\''
                        }
                        c => c,
                    };

                    return Ok(Token::Literal(Constant::Fixnum(code as i64)));
                }
                Some('x') => {
                    self.skip_char('x');
                    return self.radix_constant(16);
                }
                Some('o') => {
                    self.skip_char('o');
                    return self.radix_constant(8);
                }
                Some('b') => {
                    self.skip_char('b');
                    return self.radix_constant(2);
                }
                _ => {
                    token.push('0');
                }
            }
        }

        self.digits(10, &mut token);

        if self.reader.peek() == Some(&'.') {
            self.skip_char('.');

            match self.reader.peek() {
                Some(&d) if d.is_ascii_digit() => {
                    token.push('.');
                    self.digits(10, &mut token);

                    if let Some(&e) = self.reader.peek() {
                        if e == 'e' || e == 'E' {
                            self.skip_char(e);

                            let mut exponent = String::new();

                            if let Some(&sign) = self.reader.peek() {
                                if sign == '+' || sign == '-' {
                                    self.skip_char(sign);
                                    exponent.push(sign);
                                }
                            }

                            self.digits(10, &mut exponent);

                            if exponent.chars().any(|c| c.is_ascii_digit()) {
                                token.push('e');
                                token.push_str(&exponent);
                            } else {
                                self.reader.put_back_all(exponent.chars());
                                self.return_char(e);
                            }
                        }
                    }

                    return token
                        .parse::<f64>()
                        .map(|f| Token::Literal(Constant::from(f)))
                        .map_err(|_| ParserError::ParseNumber(self.line_num, self.col_num));
                }
                _ => {
                    self.return_char('.');
                }
            }
        }

        token
            .parse::<i64>()
            .map(|n| Token::Literal(Constant::Fixnum(n)))
            .map_err(|_| ParserError::ParseNumber(self.line_num, self.col_num))
    }

    /// Reads the next token, reporting whether layout text preceded
    /// it.
    pub fn next_token(&mut self) -> Result<(Token, bool), ParserError> {
        let layout_inserted = self.scan_for_layout()?;
        let c = self.lookahead_char()?;

        self.token_start = (self.line_num, self.col_num);

        if capital_letter_char!(c) || variable_indicator_char!(c) {
            return Ok((self.variable_token()?, layout_inserted));
        }

        let token = match c {
            ',' => {
                self.skip_char(c);
                Token::Comma
            }
            ')' => {
                self.skip_char(c);
                Token::Close
            }
            '(' => {
                self.skip_char(c);

                if layout_inserted {
                    Token::Open
                } else {
                    Token::OpenCT
                }
            }
            '.' => {
                self.skip_char(c);

                match self.reader.peek() {
                    None => Token::End,
                    Some(&c) if layout_char!(c) || c == '%' => {
                        if new_line_char!(c) {
                            self.skip_char(c);
                        }

                        Token::End
                    }
                    _ => {
                        self.return_char('.');
                        self.name_token('.')?
                    }
                }
            }
            ']' => {
                self.skip_char(c);
                Token::CloseList
            }
            '[' => {
                self.skip_char(c);
                Token::OpenList
            }
            '|' => {
                self.skip_char(c);

                if self.reader.peek() == Some(&'|') {
                    self.skip_char('|');
                    Token::Literal(Constant::Atom(atom!("||")))
                } else {
                    Token::HeadTailSeparator
                }
            }
            '{' => {
                self.skip_char(c);
                Token::OpenCurly
            }
            '}' => {
                self.skip_char(c);
                Token::CloseCurly
            }
            '"' => Token::String(self.quoted_text('"')?),
            c if c.is_ascii_digit() => self.number_token(c)?,
            c => self.name_token(c)?,
        };

        Ok((token, layout_inserted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(src.chars());
        let mut tokens = vec![];

        while !lexer.at_eof().unwrap() {
            tokens.push(lexer.next_token().unwrap().0);
        }

        tokens
    }

    #[test]
    fn clause_tokens() {
        assert_eq!(
            tokens("foo(X, 'a b') :- bar. % trailing"),
            vec![
                Token::Literal(Constant::Atom(atom!("foo"))),
                Token::OpenCT,
                Token::Var("X".into()),
                Token::Comma,
                Token::Literal(Constant::Atom(atom!("a b"))),
                Token::Close,
                Token::Literal(Constant::Atom(atom!(":-"))),
                Token::Literal(Constant::Atom(atom!("bar"))),
                Token::End,
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            tokens("12 3.5 0'a 0x1F 1.0e3 7."),
            vec![
                Token::Literal(Constant::Fixnum(12)),
                Token::Literal(Constant::from(3.5)),
                Token::Literal(Constant::Fixnum(97)),
                Token::Literal(Constant::Fixnum(31)),
                Token::Literal(Constant::from(1000.0)),
                Token::Literal(Constant::Fixnum(7)),
                Token::End,
            ]
        );
    }

    #[test]
    fn comments_and_escapes() {
        assert_eq!(
            tokens("/* block */ 'it''s\\n' \"ab\"."),
            vec![
                Token::Literal(Constant::Atom(atom!("it's\n"))),
                Token::String("ab".into()),
                Token::End,
            ]
        );
    }

    #[test]
    fn unterminated_quote_reports_position() {
        let mut lexer = Lexer::new("\n'abc".chars());
        assert!(matches!(lexer.next_token(), Err(ParserError::MissingQuote(2, _))));
    }
}
