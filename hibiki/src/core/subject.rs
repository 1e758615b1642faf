use crate::error::SubjectError;
use async_nats::Subject;
use async_nats::subject::ToSubject;
use compact_str::CompactString;
use std::fmt::Display;
use std::ops::Deref;

/// NATS subject path, split into its tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPath(pub Box<[CompactString]>);

#[macro_export]
/// Creates a `SubjectPath` from
///
/// - a sequence of string literals
/// - a sequence of expressions that implement `AsRef<str>`
macro_rules! subject_path {
    [$( $segment:literal ),* $(,)?] => {
        $crate::core::subject::SubjectPath(Box::new([
            $($crate::compact_str::CompactString::const_new($segment),)*
        ]))
    };
    [$( $segment:expr ),* $(,)?] => {
        $crate::core::subject::SubjectPath(Box::new([
            $($crate::compact_str::CompactString::new($segment),)*
        ]))
    };
}

impl SubjectPath {
    /// Split a subject like `foo.bar.baz` into its tokens.
    ///
    /// No validation is done here, see [validate_publish_subject].
    pub fn parse(subject: &str) -> Self {
        if subject.is_empty() {
            return Self(Box::new([]));
        }
        Self(subject.split('.').map(CompactString::new).collect())
    }
}

impl ToSubject for SubjectPath {
    fn to_subject(&self) -> Subject {
        Subject::from(self.0.join("."))
    }
}

impl Display for SubjectPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl From<SubjectPath> for String {
    fn from(val: SubjectPath) -> Self {
        val.0.join(".")
    }
}

impl Deref for SubjectPath {
    type Target = [CompactString];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ---------------------------------------------

/// The field of a subject matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectMatcherField {
    /// Static field.
    ///
    /// for example `foo.bar` has two static fields `foo` and `bar`.
    Static(CompactString),

    /// Wildcard field.
    ///
    /// for example `foo.*` has one static field `foo` and one wildcard field `*`.
    Wildcard,

    /// Recursive wildcard field.
    ///
    /// for example `foo.>` has one static field `foo` and one recursive wildcard field `>`.
    RecursiveWildcard,
}

impl From<&str> for SubjectMatcherField {
    fn from(token: &str) -> Self {
        match token {
            "*" => SubjectMatcherField::Wildcard,
            ">" => SubjectMatcherField::RecursiveWildcard,
            s => SubjectMatcherField::Static(CompactString::new(s)),
        }
    }
}

/// The subject matcher.
///
/// Can check if a subject matches the matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectMatcher(pub Box<[SubjectMatcherField]>);

impl Deref for SubjectMatcher {
    type Target = [SubjectMatcherField];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl SubjectMatcher {
    /// Parse a subscription subject such as `orders.*.created` or `orders.>`.
    pub fn parse(subject: &str) -> Result<Self, SubjectError> {
        validate_subscribe_subject(subject)?;
        Ok(Self(subject.split('.').map(SubjectMatcherField::from).collect()))
    }

    /// Checks if a NATS subject matches this matcher pattern
    ///
    /// For example:
    /// - "foo.bar.baz" matches "foo.bar.baz"
    /// - "foo.bar.baz" matches "foo.*.baz"
    /// - "foo.bar.baz" matches "foo.>"
    /// - "foo.bar.baz" does not match "foo.bar"
    /// - "foo" does not match "foo.>"
    ///
    /// ```rust
    /// # use hibiki::{subject_matcher, subject_path};
    /// let path = subject_path!["foo", "bar", "baz"];
    ///
    /// assert!(subject_matcher!["foo", "*", "baz"].matches(&path));
    /// assert!(subject_matcher!["foo", ">"].matches(&path));
    /// assert!(!subject_matcher!["foo", "*"].matches(&path));
    /// ```
    pub fn matches(&self, subject: &SubjectPath) -> bool {
        let subject = &**subject;
        let matcher = &**self;
        let recursive = matcher.last() == Some(&SubjectMatcherField::RecursiveWildcard);

        // "foo" cannot match "foo.bar", and "foo" cannot match "foo.>" either
        if subject.len() < matcher.len() {
            return false;
        }
        if subject.len() > matcher.len() && !recursive {
            return false;
        }

        matcher.iter().zip(subject.iter()).all(|(field, token)| match field {
            SubjectMatcherField::Static(s) => s == token,
            SubjectMatcherField::Wildcard | SubjectMatcherField::RecursiveWildcard => true,
        })
    }

    /// Shorthand for [SubjectMatcher::matches] on a raw subject.
    pub fn matches_str(&self, subject: &str) -> bool {
        self.matches(&SubjectPath::parse(subject))
    }
}

/// Creates a `SubjectMatcher` from a sequence of tokens.
///
/// Syntax:
/// - Static segments: string literals
/// - "*": single-level wildcard
/// - ">": multi-level wildcard (must be last)
///
/// ```
/// # use hibiki::subject_matcher;
/// # use hibiki::core::subject::SubjectMatcherField;
/// let matcher = subject_matcher!["foo", "*", "bar"];  // matches "foo.{any}.bar"
/// assert_eq!(
///     matcher.0.as_ref(),
///     &[
///         SubjectMatcherField::Static("foo".into()),
///         SubjectMatcherField::Wildcard,
///         SubjectMatcherField::Static("bar".into()),
///     ]
/// );
/// ```
#[macro_export]
macro_rules! subject_matcher {
    [] => {
        $crate::core::subject::SubjectMatcher(Box::new([]))
    };

    [$($segment:expr),* $(,)?] => {{
        use $crate::core::subject::SubjectMatcherField;

        let segments: Vec<SubjectMatcherField> = vec![
            $( SubjectMatcherField::from($segment) ),*
        ];

        let recursive_count = segments.iter()
            .filter(|s| matches!(s, SubjectMatcherField::RecursiveWildcard))
            .count();

        if recursive_count > 1 {
            panic!("Multiple '>' wildcards are not allowed in subject matcher");
        }

        if recursive_count == 1
            && !matches!(segments.last(), Some(SubjectMatcherField::RecursiveWildcard))
        {
            panic!("'>' wildcard must be the last segment in subject matcher");
        }

        $crate::core::subject::SubjectMatcher(segments.into_boxed_slice())
    }};
}

// ---------------------------------------------

fn validate_tokens(subject: &str) -> Result<(), SubjectError> {
    if subject.is_empty() {
        return Err(SubjectError::Empty);
    }
    if subject.chars().any(char::is_whitespace) {
        return Err(SubjectError::Whitespace(subject.to_owned()));
    }
    if subject.split('.').any(str::is_empty) {
        return Err(SubjectError::EmptyToken(subject.to_owned()));
    }
    Ok(())
}

/// Check a subject that is going to be published to.
///
/// Wildcards are not allowed here.
pub fn validate_publish_subject(subject: &str) -> Result<(), SubjectError> {
    validate_tokens(subject)?;
    if subject.split('.').any(|token| token == "*" || token == ">") {
        return Err(SubjectError::Wildcard(subject.to_owned()));
    }
    Ok(())
}

/// Check a subject that is going to be subscribed to.
pub fn validate_subscribe_subject(subject: &str) -> Result<(), SubjectError> {
    validate_tokens(subject)?;
    let mut tokens = subject.split('.').peekable();
    while let Some(token) = tokens.next() {
        if token == ">" && tokens.peek().is_some() {
            return Err(SubjectError::MisplacedRecursiveWildcard(subject.to_owned()));
        }
    }
    Ok(())
}
