use crate::atom_table::*;
use crate::parser::ast::*;
use crate::parser::lexer::*;

/// An operator precedence parser reading one clause term at a time
/// from a lazily pulled character source.
pub struct Parser<R: Iterator<Item = char>> {
    pub(crate) lexer: Lexer<R>,
    tokens: Vec<(Token, bool, (usize, usize))>,
    // where the last token taken began.
    last_start: (usize, usize),
    term_line: usize,
}

fn code_list(s: &str) -> Term {
    s.chars().rev().fold(Term::Constant(Constant::EmptyList), |tail, c| {
        Term::Cons(
            Box::new(Term::Constant(Constant::Fixnum(c as i64))),
            Box::new(tail),
        )
    })
}

impl<R: Iterator<Item = char>> Parser<R> {
    pub fn new(src: R) -> Self {
        Parser {
            lexer: Lexer::new(src),
            tokens: vec![],
            last_start: (1, 0),
            term_line: 1,
        }
    }

    #[inline]
    pub fn line_num(&self) -> usize {
        self.lexer.line_num
    }

    /// The line the last term read began on.
    #[inline]
    pub fn term_line(&self) -> usize {
        self.term_line
    }

    fn next(&mut self) -> Result<(Token, bool), ParserError> {
        match self.tokens.pop() {
            Some((token, layout, start)) => {
                self.last_start = start;
                Ok((token, layout))
            }
            None => {
                let token = self.lexer.next_token()?;
                self.last_start = self.lexer.token_start;
                Ok(token)
            }
        }
    }

    fn peek(&mut self) -> Result<(&Token, bool), ParserError> {
        if self.tokens.is_empty() {
            let (token, layout) = self.lexer.next_token()?;
            self.tokens.push((token, layout, self.lexer.token_start));
        }

        match self.tokens.last() {
            Some((token, layout, _)) => Ok((token, *layout)),
            None => Err(ParserError::UnexpectedEOF(self.lexer.line_num)),
        }
    }

    // errors are placed at the start of the token that could not be
    // reduced, not where the lexer stopped.
    #[inline]
    fn reduction_error(&self) -> ParserError {
        let (line, col) = self.last_start;
        ParserError::IncompleteReduction(line, col)
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParserError> {
        let (token, _) = self.next()?;

        if token == expected {
            Ok(())
        } else {
            Err(self.reduction_error())
        }
    }

    /// Skips tokens through the next end token. Used to resynchronize
    /// after a syntax error.
    pub fn skip_to_end(&mut self) {
        loop {
            match self.next() {
                Ok((Token::End, _)) => break,
                Ok(_) => {}
                Err(ParserError::UnexpectedEOF(_)) | Err(ParserError::IO(_)) => break,
                Err(_) => {
                    // drop the offending character and keep scanning
                    if self.lexer.reader.next().is_none() {
                        break;
                    }
                }
            }
        }
    }

    /// Reads the next clause term, or `None` at the end of input.
    pub fn read_term(&mut self, op_dir: &OpDir) -> Result<Option<Term>, ParserError> {
        if self.tokens.is_empty() && self.lexer.at_eof()? {
            return Ok(None);
        }

        self.peek()?;
        self.term_line = self.tokens.last().map(|(_, _, (line, _))| *line).unwrap_or(self.lexer.line_num);

        let (term, _) = self.parse(op_dir, 1200)?;

        match self.next()? {
            (Token::End, _) => Ok(Some(term)),
            _ => Err(self.reduction_error()),
        }
    }

    fn infix_op(&mut self, op_dir: &OpDir) -> Result<Option<(Atom, OpDesc)>, ParserError> {
        let name = match self.peek()? {
            (Token::Literal(Constant::Atom(name)), _) => name.clone(),
            (Token::Comma, _) => atom!(","),
            (Token::HeadTailSeparator, _) => atom!("|"),
            _ => return Ok(None),
        };

        Ok(op_dir
            .get(&(name.clone(), Fixity::In))
            .or_else(|| op_dir.get(&(name.clone(), Fixity::Post)))
            .map(|desc| (name, *desc)))
    }

    fn parse(&mut self, op_dir: &OpDir, max: u16) -> Result<(Term, u16), ParserError> {
        let (mut left, mut left_prec) = self.parse_primary(op_dir, max)?;

        while let Some((name, desc)) = self.infix_op(op_dir)? {
            let (prec, spec) = desc.get();
            let (left_max, right_max) = spec.arg_priorities(prec);

            if prec > max || left_prec > left_max {
                break;
            }

            self.next()?;

            if spec.is_postfix() {
                left = Term::Clause(name, vec![left]);
            } else {
                let (right, _) = self.parse(op_dir, right_max)?;
                let name = if name.as_str() == "|" { atom!(";") } else { name };

                left = Term::Clause(name, vec![left, right]);
            }

            left_prec = prec;
        }

        Ok((left, left_prec))
    }

    fn prefix_operand_follows(&mut self, op_dir: &OpDir) -> Result<bool, ParserError> {
        Ok(match self.peek()? {
            (Token::End, _)
            | (Token::Close, _)
            | (Token::Comma, _)
            | (Token::CloseList, _)
            | (Token::CloseCurly, _)
            | (Token::HeadTailSeparator, _) => false,
            (Token::Literal(Constant::Atom(name)), _) => {
                let name = name.clone();

                !op_dir.contains_key(&(name.clone(), Fixity::In))
                    || op_dir.contains_key(&(name, Fixity::Pre))
            }
            _ => true,
        })
    }

    fn parse_args(&mut self, op_dir: &OpDir) -> Result<Vec<Term>, ParserError> {
        let mut args = vec![];

        loop {
            let (arg, _) = self.parse(op_dir, 999)?;
            args.push(arg);

            match self.next()? {
                (Token::Comma, _) => {}
                (Token::Close, _) => break,
                _ => return Err(self.reduction_error()),
            }
        }

        if args.len() > MAX_ARITY {
            return Err(ParserError::ExceededMaxArity(self.lexer.line_num));
        }

        Ok(args)
    }

    fn parse_list(&mut self, op_dir: &OpDir) -> Result<Term, ParserError> {
        if matches!(self.peek()?, (Token::CloseList, _)) {
            self.next()?;
            return Ok(Term::Constant(Constant::EmptyList));
        }

        let mut elems = vec![];

        let tail = loop {
            let (elem, _) = self.parse(op_dir, 999)?;
            elems.push(elem);

            match self.next()? {
                (Token::Comma, _) => {}
                (Token::HeadTailSeparator, _) => {
                    let (tail, _) = self.parse(op_dir, 999)?;
                    self.expect(Token::CloseList)?;
                    break tail;
                }
                (Token::CloseList, _) => break Term::Constant(Constant::EmptyList),
                _ => return Err(self.reduction_error()),
            }
        };

        Ok(elems
            .into_iter()
            .rev()
            .fold(tail, |tail, head| Term::Cons(Box::new(head), Box::new(tail))))
    }

    fn parse_primary(&mut self, op_dir: &OpDir, max: u16) -> Result<(Term, u16), ParserError> {
        let (token, _) = self.next()?;

        match token {
            Token::Literal(Constant::Atom(name)) => {
                if name.as_str() == "-" {
                    if matches!(
                        self.peek()?,
                        (Token::Literal(Constant::Fixnum(_) | Constant::Float(_)), false)
                    ) {
                        return match self.next()? {
                            (Token::Literal(Constant::Fixnum(n)), _) => {
                                Ok((Term::Constant(Constant::Fixnum(-n)), 0))
                            }
                            (Token::Literal(Constant::Float(f)), _) => {
                                Ok((Term::Constant(Constant::from(-f.into_inner())), 0))
                            }
                            _ => Err(self.reduction_error()),
                        };
                    }
                }

                if matches!(self.peek()?, (Token::OpenCT, _)) {
                    self.next()?;
                    let args = self.parse_args(op_dir)?;
                    return Ok((Term::Clause(name, args), 0));
                }

                if let Some(desc) = op_dir.get(&(name.clone(), Fixity::Pre)).cloned() {
                    if self.prefix_operand_follows(op_dir)? {
                        let (mut prec, spec) = desc.get();
                        let (_, mut arg_max) = spec.arg_priorities(prec);

                        if prec > max {
                            prec = max;
                            arg_max = arg_max.min(max);
                        }

                        let (arg, _) = self.parse(op_dir, arg_max)?;
                        return Ok((Term::Clause(name, vec![arg]), prec));
                    }
                }

                Ok((Term::Constant(Constant::Atom(name)), 0))
            }
            Token::Literal(c) => Ok((Term::Constant(c), 0)),
            Token::Var(name) => {
                if name == "_" {
                    Ok((Term::AnonVar, 0))
                } else {
                    Ok((Term::Var(name), 0))
                }
            }
            Token::String(s) => Ok((code_list(&s), 0)),
            Token::Open | Token::OpenCT => {
                let (term, _) = self.parse(op_dir, 1200)?;
                self.expect(Token::Close)?;
                Ok((term, 0))
            }
            Token::OpenList => Ok((self.parse_list(op_dir)?, 0)),
            Token::OpenCurly => {
                if matches!(self.peek()?, (Token::CloseCurly, _)) {
                    self.next()?;
                    return Ok((Term::atom("{}"), 0));
                }

                let (term, _) = self.parse(op_dir, 1200)?;
                self.expect(Token::CloseCurly)?;

                Ok((Term::Clause(atom!("{}"), vec![term]), 0))
            }
            _ => Err(self.reduction_error()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(src: &str) -> Term {
        let op_dir = default_op_dir();
        let mut parser = Parser::new(src.chars());
        parser.read_term(&op_dir).unwrap().unwrap()
    }

    fn clause(name: &str, args: Vec<Term>) -> Term {
        Term::Clause(atom!(name), args)
    }

    fn var(name: &str) -> Term {
        Term::Var(name.to_string())
    }

    #[test]
    fn operator_precedence() {
        assert_eq!(
            read("X is 1 + 2 * 3."),
            clause(
                "is",
                vec![
                    var("X"),
                    clause(
                        "+",
                        vec![
                            Term::Constant(Constant::Fixnum(1)),
                            clause(
                                "*",
                                vec![
                                    Term::Constant(Constant::Fixnum(2)),
                                    Term::Constant(Constant::Fixnum(3))
                                ]
                            )
                        ]
                    )
                ]
            )
        );
    }

    #[test]
    fn left_associative_minus() {
        assert_eq!(
            read("a - b - c."),
            clause(
                "-",
                vec![clause("-", vec![Term::atom("a"), Term::atom("b")]), Term::atom("c")]
            )
        );
    }

    #[test]
    fn rules_and_lists() {
        let term = read("app([H|T], L, [H|R]) :- app(T, L, R).");

        match term {
            Term::Clause(name, args) => {
                assert_eq!(name.as_str(), ":-");
                assert_eq!(args[1], clause("app", vec![var("T"), var("L"), var("R")]));
            }
            _ => panic!("expected a rule"),
        }
    }

    #[test]
    fn negative_numbers_and_prefix_minus() {
        assert_eq!(read("-1."), Term::Constant(Constant::Fixnum(-1)));
        assert_eq!(
            read("- 1."),
            clause("-", vec![Term::Constant(Constant::Fixnum(1))])
        );
        assert_eq!(
            read("a-1."),
            clause("-", vec![Term::atom("a"), Term::Constant(Constant::Fixnum(1))])
        );
    }

    #[test]
    fn control_constructs() {
        assert_eq!(
            read("(a -> b ; c)."),
            clause(
                ";",
                vec![clause("->", vec![Term::atom("a"), Term::atom("b")]), Term::atom("c")]
            )
        );
        assert_eq!(read("\\+ a."), clause("\\+", vec![Term::atom("a")]));
        assert_eq!(read("[a|b]."), Term::Cons(Box::new(Term::atom("a")), Box::new(Term::atom("b"))));
    }

    #[test]
    fn syntax_error_has_line_number() {
        let op_dir = default_op_dir();
        let mut parser = Parser::new("a.\nfoo(. \n".chars());

        assert!(parser.read_term(&op_dir).unwrap().is_some());

        let err = parser.read_term(&op_dir).unwrap_err();
        assert_eq!(err.line_and_col_num().map(|(line, _)| line), Some(2));
    }

    #[test]
    fn terms_know_the_line_they_start_on() {
        let op_dir = default_op_dir();
        let mut parser = Parser::new("a.\n\n% comment\nfoo(X) :-\n    bar(X).\n".chars());

        assert!(parser.read_term(&op_dir).unwrap().is_some());
        assert_eq!(parser.term_line(), 1);

        assert!(parser.read_term(&op_dir).unwrap().is_some());
        assert_eq!(parser.term_line(), 4);
        assert_eq!(parser.line_num(), 6);
    }

    #[test]
    fn errors_at_an_end_token_name_its_line() {
        let op_dir = default_op_dir();
        let mut parser = Parser::new("p(1).\np(.\n".chars());

        assert!(parser.read_term(&op_dir).unwrap().is_some());

        let err = parser.read_term(&op_dir).unwrap_err();
        assert_eq!(err.line_and_col_num(), Some((2, 2)));
    }

    #[test]
    fn end_of_input() {
        let op_dir = default_op_dir();
        let mut parser = Parser::new("  % nothing here\n".chars());

        assert!(parser.read_term(&op_dir).unwrap().is_none());
    }
}
