use std::iter::Peekable;

/// Sorted merge of redaction targets against candidate positions
///
/// Built from the ascending target positions of one chunk. Candidates passed
/// to [`is_target`](Self::is_target) must be ascending as well: the checker
/// only moves forward, so a candidate below one already checked may be
/// reported as not a target even if it is one. This is not checked.
///
/// # Example
///
/// ```
/// use chunk_scavenger::redaction::RedactionTargetChecker;
///
/// let mut checker = RedactionTargetChecker::new(vec![10, 20, 30]);
/// assert!(checker.any_targets());
/// assert!(!checker.is_target(5));
/// assert!(checker.is_target(10));
/// assert!(!checker.is_target(25));
/// assert!(checker.is_target(30));
/// ```
#[derive(Debug)]
pub struct RedactionTargetChecker<I: Iterator<Item = i64>> {
    targets: Peekable<I>,
    any_targets: bool,
}

impl<I: Iterator<Item = i64>> RedactionTargetChecker<I> {
    /// Create a checker over ascending target positions
    pub fn new<T>(targets: T) -> Self
    where
        T: IntoIterator<IntoIter = I>,
    {
        let mut targets = targets.into_iter().peekable();
        let any_targets = targets.peek().is_some();
        Self {
            targets,
            any_targets,
        }
    }

    /// Whether there was at least one target at construction
    #[inline]
    pub fn any_targets(&self) -> bool {
        self.any_targets
    }

    /// Check if `candidate` is a target, consuming every target below it
    pub fn is_target(&mut self, candidate: i64) -> bool {
        while self.targets.next_if(|target| *target < candidate).is_some() {}
        self.targets.peek() == Some(&candidate)
    }
}
