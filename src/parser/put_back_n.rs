use std::iter::Peekable;

/// A peekable iterator that accepts any number of items pushed back
/// onto its front. The lexer reads its characters through one of
/// these.
#[derive(Debug, Clone)]
pub struct PutBackN<I: Iterator> {
    top: Vec<I::Item>,
    iter: Peekable<I>,
}

pub fn put_back_n<I>(iterable: I) -> PutBackN<I::IntoIter>
where
    I: IntoIterator,
{
    PutBackN {
        top: Vec::new(),
        iter: iterable.into_iter().peekable(),
    }
}

impl<I: Iterator> PutBackN<I> {
    #[inline]
    pub(crate) fn put_back(&mut self, item: I::Item) {
        self.top.push(item);
    }

    #[inline]
    pub(crate) fn peek(&mut self) -> Option<&I::Item> {
        if self.top.is_empty() {
            self.iter.peek()
        } else {
            self.top.last()
        }
    }

    /// Pushes back a run of items so that they are read again in
    /// their original order.
    #[inline]
    pub(crate) fn put_back_all<DEI: DoubleEndedIterator<Item = I::Item>>(&mut self, iter: DEI) {
        self.top.extend(iter.rev());
    }
}

impl<I: Iterator> Iterator for PutBackN<I> {
    type Item = I::Item;

    #[inline]
    fn next(&mut self) -> Option<I::Item> {
        if self.top.is_empty() {
            self.iter.next()
        } else {
            self.top.pop()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_back_restores_order() {
        let mut iter = put_back_n("abc".chars());

        assert_eq!(iter.next(), Some('a'));
        assert_eq!(iter.next(), Some('b'));

        iter.put_back_all(['a', 'b'].into_iter());

        assert_eq!(iter.peek(), Some(&'a'));
        assert_eq!(iter.collect::<String>(), "abc");
    }
}
