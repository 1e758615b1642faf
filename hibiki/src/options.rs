use crate::core::subject::validate_subscribe_subject;
use crate::error::OptionError;
use crate::http::HttpHandler;
use crate::service::{Endpoint, RequestHandler};
use crate::subscription::MessageHandler;
use async_nats::HeaderMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

macro_rules! functional_option {
    ($(#[$meta:meta])* $option:ident => $target:ident) => {
        $(#[$meta])*
        pub struct $option(Box<dyn FnOnce(&mut $target) -> Result<(), OptionError> + Send>);

        impl $option {
            /// Build an option from any closure.
            pub fn custom<F>(f: F) -> Self
            where
                F: FnOnce(&mut $target) -> Result<(), OptionError> + Send + 'static,
            {
                Self(Box::new(f))
            }

            /// Apply the option to the target.
            pub fn apply(self, target: &mut $target) -> Result<(), OptionError> {
                (self.0)(target)
            }
        }

        impl Debug for $option {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(stringify!($option))
            }
        }

        impl $target {
            /// Apply the options in order, starting from the defaults.
            pub fn from_options<I>(options: I) -> Result<Self, OptionError>
            where
                I: IntoIterator<Item = $option>,
            {
                let mut target = Self::default();
                for option in options {
                    option.apply(&mut target)?;
                }
                Ok(target)
            }
        }
    };
}

pub(crate) fn validate_queue(name: &str) -> Result<(), OptionError> {
    if name.is_empty() {
        return Err(OptionError::EmptyQueue);
    }
    if name.chars().any(char::is_whitespace) {
        return Err(OptionError::InvalidQueue(name.to_owned()));
    }
    Ok(())
}

// ---------------------------------------------

/// Options of a subscription.
#[derive(Default, Clone)]
pub struct SubOptions {
    /// Queue group to join. Each message goes to one member of the group.
    pub queue: Option<String>,

    /// Handler called for every message. Without a handler the
    /// [Subscription](crate::Subscription) is a stream of messages.
    pub handler: Option<Arc<dyn MessageHandler>>,
}

impl Debug for SubOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubOptions")
            .field("queue", &self.queue)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

functional_option!(
    /// A functional option for [SubOptions].
    SubOption => SubOptions
);

impl SubOption {
    /// Join a queue group.
    pub fn queue(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::custom(move |options| {
            validate_queue(&name)?;
            options.queue = Some(name);
            Ok(())
        })
    }

    /// Deliver messages to a handler instead of returning a stream.
    ///
    /// ```rust
    /// # use hibiki::SubOption;
    /// let option = SubOption::handler(|msg: async_nats::Message| async move {
    ///     hibiki::tracing::info!(subject = %msg.subject, "received");
    /// });
    /// ```
    pub fn handler<H: MessageHandler>(handler: H) -> Self {
        let handler: Arc<dyn MessageHandler> = Arc::new(handler);
        Self::custom(move |options| {
            options.handler = Some(handler);
            Ok(())
        })
    }
}

// ---------------------------------------------

/// Options of a request.
#[derive(Debug, Default, Clone)]
pub struct ReqOptions {
    /// How long to wait for the reply. Falls back to the connection default.
    ///
    /// For streamed replies it is the longest wait between two chunks.
    pub timeout: Option<Duration>,

    /// Abort the request once this token is cancelled.
    pub cancel: Option<CancellationToken>,

    /// Headers sent along with the request.
    pub headers: Option<HeaderMap>,
}

functional_option!(
    /// A functional option for [ReqOptions].
    ReqOption => ReqOptions
);

impl ReqOption {
    /// Wait at most `timeout` for the reply.
    pub fn timeout(timeout: Duration) -> Self {
        Self::custom(move |options| {
            if timeout.is_zero() {
                return Err(OptionError::ZeroTimeout);
            }
            options.timeout = Some(timeout);
            Ok(())
        })
    }

    /// Abort the request when `token` is cancelled.
    ///
    /// Pair with a deadline by cancelling the token from a timer, or use
    /// [ReqOption::timeout] as well.
    pub fn cancel_on(token: CancellationToken) -> Self {
        Self::custom(move |options| {
            options.cancel = Some(token);
            Ok(())
        })
    }

    /// Send headers with the request.
    pub fn headers(headers: HeaderMap) -> Self {
        Self::custom(move |options| {
            options.headers = Some(headers);
            Ok(())
        })
    }
}

// ---------------------------------------------

/// Discovery endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverOptions {
    /// Subject every instance answers discovery requests on.
    pub subject: String,
    /// Free text description of the service.
    pub description: String,
}

/// Options of a service.
#[derive(Debug, Default, Clone)]
pub struct ServiceOptions {
    /// Queue group, defaults to the service version.
    pub queue: Option<String>,

    /// What answers requests on the service subject.
    pub endpoint: Option<Endpoint>,

    /// Discovery endpoint.
    pub discover: Option<DiscoverOptions>,

    /// Health endpoint subject.
    pub health: Option<String>,
}

functional_option!(
    /// A functional option for [ServiceOptions].
    ServiceOption => ServiceOptions
);

impl ServiceOption {
    /// Use another queue group than the version.
    pub fn queue(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::custom(move |options| {
            validate_queue(&name)?;
            options.queue = Some(name);
            Ok(())
        })
    }

    /// Answer requests with a handler. Replaces any HTTP handler.
    pub fn handler<H: RequestHandler>(handler: H) -> Self {
        let endpoint = Endpoint::Request(Arc::new(handler));
        Self::custom(move |options| {
            options.endpoint = Some(endpoint);
            Ok(())
        })
    }

    /// Answer requests with an HTTP handler. Replaces any request handler.
    pub fn http_handler<H: HttpHandler>(handler: H) -> Self {
        let endpoint = Endpoint::Http(Arc::new(handler));
        Self::custom(move |options| {
            options.endpoint = Some(endpoint);
            Ok(())
        })
    }

    /// Answer discovery requests on `subject`.
    pub fn discover(subject: impl Into<String>, description: impl Into<String>) -> Self {
        let subject = subject.into();
        let description = description.into();
        Self::custom(move |options| {
            validate_subscribe_subject(&subject)?;
            options.discover = Some(DiscoverOptions {
                subject,
                description,
            });
            Ok(())
        })
    }

    /// Answer health checks on `subject`.
    pub fn health(subject: impl Into<String>) -> Self {
        let subject = subject.into();
        Self::custom(move |options| {
            validate_subscribe_subject(&subject)?;
            options.health = Some(subject);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SubjectError;
    use async_nats::Message;

    #[test]
    fn no_options_means_defaults() {
        let options = SubOptions::from_options(Vec::<SubOption>::new()).unwrap();
        assert!(options.queue.is_none());
        assert!(options.handler.is_none());

        let options = ReqOptions::from_options(Vec::<ReqOption>::new()).unwrap();
        assert!(options.timeout.is_none());
        assert!(options.cancel.is_none());
    }

    #[test]
    fn options_set_their_field() {
        let options = SubOptions::from_options([
            SubOption::queue("bar"),
            SubOption::handler(|_msg: Message| async {}),
        ])
        .unwrap();
        assert_eq!(options.queue.as_deref(), Some("bar"));
        assert!(options.handler.is_some());

        let token = CancellationToken::new();
        let options = ReqOptions::from_options([
            ReqOption::timeout(Duration::from_secs(2)),
            ReqOption::cancel_on(token.clone()),
        ])
        .unwrap();
        assert_eq!(options.timeout, Some(Duration::from_secs(2)));
        token.cancel();
        assert!(options.cancel.is_some_and(|c| c.is_cancelled()));
    }

    #[test]
    fn last_option_wins() {
        let options =
            SubOptions::from_options([SubOption::queue("first"), SubOption::queue("second")])
                .unwrap();
        assert_eq!(options.queue.as_deref(), Some("second"));

        let options = ReqOptions::from_options([
            ReqOption::timeout(Duration::from_secs(2)),
            ReqOption::timeout(Duration::from_millis(100)),
        ])
        .unwrap();
        assert_eq!(options.timeout, Some(Duration::from_millis(100)));
    }

    #[test]
    fn first_failure_is_returned_immediately() {
        let err = SubOptions::from_options([
            SubOption::queue(""),
            SubOption::custom(|_| Err(OptionError::Invalid("never reached".into()))),
        ])
        .unwrap_err();
        assert!(matches!(err, OptionError::EmptyQueue));

        let err = SubOptions::from_options([SubOption::queue("a b")]).unwrap_err();
        assert!(matches!(err, OptionError::InvalidQueue(name) if name == "a b"));

        let err = ReqOptions::from_options([ReqOption::timeout(Duration::ZERO)]).unwrap_err();
        assert!(matches!(err, OptionError::ZeroTimeout));
    }

    #[test]
    fn custom_options_see_previous_values() {
        let options = ReqOptions::from_options([
            ReqOption::timeout(Duration::from_secs(1)),
            ReqOption::custom(|options| {
                options.timeout = options.timeout.map(|t| t * 3);
                Ok(())
            }),
        ])
        .unwrap();
        assert_eq!(options.timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn service_endpoint_slot_is_shared() {
        let options = ServiceOptions::from_options([
            ServiceOption::handler(|_msg: Message| async {
                Ok::<_, anyhow::Error>(bytes::Bytes::new())
            }),
            ServiceOption::http_handler(|_req: http::Request<bytes::Bytes>| async {
                http::Response::new(bytes::Bytes::new())
            }),
        ])
        .unwrap();
        assert!(matches!(options.endpoint, Some(Endpoint::Http(_))));
    }

    #[test]
    fn service_control_subjects_are_validated() {
        let options = ServiceOptions::from_options([
            ServiceOption::discover("services.my.service", "adds numbers"),
            ServiceOption::health("my.service.healthz"),
        ])
        .unwrap();
        assert_eq!(
            options.discover,
            Some(DiscoverOptions {
                subject: "services.my.service".into(),
                description: "adds numbers".into(),
            })
        );
        assert_eq!(options.health.as_deref(), Some("my.service.healthz"));

        let err =
            ServiceOptions::from_options([ServiceOption::health("bad..subject")]).unwrap_err();
        assert!(matches!(
            err,
            OptionError::Subject(SubjectError::EmptyToken(_))
        ));
    }
}
