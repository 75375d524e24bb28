use super::super::*;
use super::{CharIterator, ParseError, SourcePos};

#[derive(Debug, PartialEq)]
pub enum DimacsToken {
    /// p cnf header
    Header,

    /// A Literal, i.e., a signed or unsigned integer
    Lit(Literal),

    /// A zero integer, used as an ending sign
    Zero,

    /// Quantification, i.e., `e`, `a`, `r <prob>`, and `t <prob>`
    Quant(QuantKind),

    /// End-of-line
    EOL,

    /// End-of-file
    EOF,
}

#[derive(Debug, PartialEq)]
pub enum QuantKind {
    Exists,
    Forall,
    /// Random quantification, `-1` leaves the probability unspecified
    Random(f64),
    /// Threshold entry of the prefix
    Threshold(f64),
}

pub struct DimacsTokenStream<'a> {
    chars: CharIterator<'a>,
}

impl<'a> DimacsTokenStream<'a> {
    pub fn new(content: &'a str) -> DimacsTokenStream<'a> {
        DimacsTokenStream {
            chars: CharIterator::new(content),
        }
    }

    pub fn next_token(&mut self) -> Result<DimacsToken, ParseError> {
        while let Some(c) = self.chars.next() {
            match c {
                'c' => {
                    // comment line, ignore until next newline
                    self.chars.skip_while(|c| *c != '\n');
                }
                'p' => {
                    // DIMACS header
                    self.chars.expect_str(" cnf ")?;
                    return Ok(DimacsToken::Header);
                }
                'e' => return Ok(DimacsToken::Quant(QuantKind::Exists)),
                'a' => return Ok(DimacsToken::Quant(QuantKind::Forall)),
                'r' => {
                    let probability = self.chars.read_probability()?;
                    return Ok(DimacsToken::Quant(QuantKind::Random(probability)));
                }
                't' => {
                    let threshold = self.chars.read_probability()?;
                    if threshold < 0.0 {
                        return Err(ParseError {
                            msg: "Threshold has to lie between 0 and 1".to_string(),
                            pos: self.chars.pos,
                        });
                    }
                    return Ok(DimacsToken::Quant(QuantKind::Threshold(threshold)));
                }
                '0' => return Ok(DimacsToken::Zero),
                '-' => {
                    // negated literal
                    return Ok(DimacsToken::Lit(self.chars.read_literal('-')?));
                }
                c if c.is_ascii_digit() => {
                    // digit
                    return Ok(DimacsToken::Lit(self.chars.read_literal(c)?));
                }
                '\n' => return Ok(DimacsToken::EOL),
                ' ' | '\t' | '\r' => continue,
                _ => {
                    return Err(ParseError {
                        msg: format!("Encountered unknown token `{}` during lexing", c),
                        pos: self.chars.pos,
                    });
                }
            }
        }
        // end of file
        Ok(DimacsToken::EOF)
    }

    pub fn pos(&self) -> SourcePos {
        self.chars.pos
    }
}

fn read_count(lexer: &mut DimacsTokenStream, what: &str) -> Result<usize, ParseError> {
    match lexer.next_token()? {
        DimacsToken::Zero => Ok(0),
        DimacsToken::Lit(l) if !l.signed() => Ok(l.variable() as usize),
        DimacsToken::Lit(_) => Err(ParseError {
            msg: format!(
                "Malformed `p cnf` header, found negative value for number of {}",
                what
            ),
            pos: lexer.pos(),
        }),
        token => Err(ParseError {
            msg: format!(
                "Malformed `p cnf` header, expected number of {}, found `{:?}`",
                what, token
            ),
            pos: lexer.pos(),
        }),
    }
}

/// Parses the `p cnf NUM NUM` header and returns number of variables and number of clauses
pub fn parse_header(lexer: &mut DimacsTokenStream) -> Result<(usize, usize), ParseError> {
    // first non-EOL token has to be `p cnf ` header
    loop {
        match lexer.next_token()? {
            DimacsToken::EOL => continue,
            DimacsToken::Header => break,
            token => {
                return Err(ParseError {
                    msg: format!("Expect `p cnf`, but found `{:?}`", token),
                    pos: lexer.pos(),
                });
            }
        }
    }
    let num_variables = read_count(lexer, "variables")?;
    let num_clauses = read_count(lexer, "clauses")?;
    Ok((num_variables, num_clauses))
}

/// Reads clauses starting with token `current` until the end of input.
/// Clauses are terminated by `0` and may span several lines.
pub fn parse_matrix(
    lexer: &mut DimacsTokenStream,
    matrix: &mut Matrix,
    mut current: DimacsToken,
    num_clauses_expected: usize,
) -> Result<(), ParseError> {
    let mut literals: Vec<Literal> = Vec::new();
    let mut num_clauses_read = 0;

    loop {
        match current {
            DimacsToken::Zero => {
                // end of clause
                matrix.add(Clause::new(literals));
                literals = Vec::new();
                num_clauses_read += 1;
            }
            DimacsToken::Lit(l) => {
                literals.push(l);
            }
            DimacsToken::EOL => {}
            DimacsToken::EOF => {
                if !literals.is_empty() {
                    // End-of-file during clause read
                    return Err(ParseError {
                        msg: "Unexpected end of input while reading clause".to_string(),
                        pos: lexer.pos(),
                    });
                }
                if num_clauses_expected != num_clauses_read {
                    return Err(ParseError {
                        msg: format!(
                            "Expected {} clauses, but found {}",
                            num_clauses_expected, num_clauses_read
                        ),
                        pos: lexer.pos(),
                    });
                }
                return Ok(());
            }
            _ => {
                return Err(ParseError {
                    msg: format!("Unexpected token `{:?}` while reading clause", current),
                    pos: lexer.pos(),
                });
            }
        }
        current = lexer.next_token()?;
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_lexer_simple() {
        let mut stream = DimacsTokenStream::new("p cnf 0 0\n");
        assert_eq!(stream.next_token(), Ok(DimacsToken::Header));
        assert_eq!(stream.next_token(), Ok(DimacsToken::Zero));
        assert_eq!(stream.next_token(), Ok(DimacsToken::Zero));
        assert_eq!(stream.next_token(), Ok(DimacsToken::EOL));
        assert_eq!(stream.next_token(), Ok(DimacsToken::EOF));
    }

    #[test]
    fn test_lexer_quantifiers() {
        let mut stream =
            DimacsTokenStream::new("c comment\np cnf 12 0\ne a r 0.5 t 0.75\n-1 12\t0\n");
        assert_eq!(stream.next_token(), Ok(DimacsToken::Header));
        assert_eq!(stream.next_token(), Ok(DimacsToken::Lit(12.into())));
        assert_eq!(stream.next_token(), Ok(DimacsToken::Zero));
        assert_eq!(stream.next_token(), Ok(DimacsToken::EOL));

        assert_eq!(
            stream.next_token(),
            Ok(DimacsToken::Quant(QuantKind::Exists))
        );
        assert_eq!(
            stream.next_token(),
            Ok(DimacsToken::Quant(QuantKind::Forall))
        );
        assert_eq!(
            stream.next_token(),
            Ok(DimacsToken::Quant(QuantKind::Random(0.5)))
        );
        assert_eq!(
            stream.next_token(),
            Ok(DimacsToken::Quant(QuantKind::Threshold(0.75)))
        );
        assert_eq!(stream.next_token(), Ok(DimacsToken::EOL));

        assert_eq!(stream.next_token(), Ok(DimacsToken::Lit((-1).into())));
        assert_eq!(stream.next_token(), Ok(DimacsToken::Lit(12.into())));
        assert_eq!(stream.next_token(), Ok(DimacsToken::Zero));
        assert_eq!(stream.next_token(), Ok(DimacsToken::EOL));
        assert_eq!(stream.next_token(), Ok(DimacsToken::EOF));
    }

    #[test]
    fn test_lexer_error() {
        let mut stream = DimacsTokenStream::new("x");
        assert!(stream.next_token().is_err());

        let mut stream = DimacsTokenStream::new("-a");
        assert!(stream.next_token().is_err());

        let mut stream = DimacsTokenStream::new("- ");
        assert!(stream.next_token().is_err());

        let mut stream = DimacsTokenStream::new("--1");
        assert!(stream.next_token().is_err());

        let mut stream = DimacsTokenStream::new("r 1.2 1 0");
        assert!(stream.next_token().is_err());

        let mut stream = DimacsTokenStream::new("t -1");
        assert!(stream.next_token().is_err());
    }

    #[test]
    fn test_parse_matrix() {
        let mut lexer = DimacsTokenStream::new("-1  2 0\n2 -3\n -4 0\n");
        let prefix = Prefix::compact(Vec::new(), 4).unwrap();
        let mut matrix = Matrix::new(prefix, 2);
        let current = lexer.next_token().unwrap();
        assert!(parse_matrix(&mut lexer, &mut matrix, current, 2).is_ok());
        let mut clause_iter = matrix.clauses.iter();
        assert_eq!(
            clause_iter.next(),
            Some(&Clause::new(vec![(-1).into(), 2.into()]))
        );
        assert_eq!(
            clause_iter.next(),
            Some(&Clause::new(vec![(2).into(), (-3).into(), (-4).into()]))
        );
        assert_eq!(clause_iter.next(), None);
    }

    #[test]
    fn test_parse_matrix_count_mismatch() {
        let mut lexer = DimacsTokenStream::new("1 0\n");
        let prefix = Prefix::compact(Vec::new(), 1).unwrap();
        let mut matrix = Matrix::new(prefix, 2);
        let current = lexer.next_token().unwrap();
        assert!(parse_matrix(&mut lexer, &mut matrix, current, 2).is_err());
    }

    #[test]
    fn test_parse_header() {
        let mut lexer = DimacsTokenStream::new("p cnf 2 4\n");
        assert_eq!(parse_header(&mut lexer), Ok((2, 4)));
    }
}
