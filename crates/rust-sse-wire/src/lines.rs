/// Line terminator styles recognized by the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Terminator {
    Lf,
    Cr,
    CrLf,
}

impl Terminator {
    pub(crate) fn as_bytes(self) -> &'static [u8] {
        match self {
            Terminator::Lf => b"\n",
            Terminator::Cr => b"\r",
            Terminator::CrLf => b"\r\n",
        }
    }
}

/// Splits a byte slice into lines, keeping each line's terminator style.
///
/// The final item has no terminator when the input does not end in one.
/// Yields nothing for empty input.
pub(crate) fn lines(input: &[u8]) -> Lines<'_> {
    Lines { rest: input }
}

pub(crate) struct Lines<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Lines<'a> {
    type Item = (&'a [u8], Option<Terminator>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        for (i, &b) in self.rest.iter().enumerate() {
            let terminator = match b {
                b'\n' => Terminator::Lf,
                b'\r' if self.rest.get(i + 1) == Some(&b'\n') => Terminator::CrLf,
                b'\r' => Terminator::Cr,
                _ => continue,
            };
            let line = &self.rest[..i];
            self.rest = &self.rest[i + terminator.as_bytes().len()..];
            return Some((line, Some(terminator)));
        }
        let line = self.rest;
        self.rest = &[];
        Some((line, None))
    }
}
