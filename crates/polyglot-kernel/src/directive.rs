//! Magic-command (`#!name`, or `#name` such as `#r`) registration and
//! invocation.

use std::future::Future;
use std::sync::{Arc, RwLock};

use clap::ArgMatches;
use futures::future::BoxFuture;
use indexmap::IndexMap;

use crate::context::KernelInvocationContext;
use crate::error::KernelError;
use crate::submission::split_words;

/// Everything a directive handler receives.
pub struct DirectiveInvocation {
    pub name: String,
    pub matches: ArgMatches,
    pub context: KernelInvocationContext,
    /// Kernel that code following the directive is routed to, when known.
    pub kernel_name: Option<String>,
}

pub type DirectiveHandler =
    Arc<dyn Fn(DirectiveInvocation) -> BoxFuture<'static, Result<(), KernelError>> + Send + Sync>;

#[derive(Clone)]
pub struct Directive {
    name: String,
    description: String,
    parser: clap::Command,
    handler: DirectiveHandler,
}

impl Directive {
    /// `name` includes its prefix: `#!who`, or `#r` for directives that
    /// use a bare `#`.
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(DirectiveInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), KernelError>> + Send + 'static,
    {
        let name = name.into();
        let description = description.into();
        let parser = clap::Command::new(name.clone())
            .about(description.clone())
            .disable_version_flag(true);
        Self {
            name,
            description,
            parser,
            handler: Arc::new(move |inv| Box::pin(handler(inv))),
        }
    }

    pub fn arg(mut self, arg: clap::Arg) -> Self {
        self.parser = self.parser.arg(arg);
        self
    }

    pub fn subcommand(mut self, sub: clap::Command) -> Self {
        self.parser = self.parser.subcommand(sub);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parse(&self, line: &str) -> Result<ArgMatches, KernelError> {
        let words = split_words(line).map_err(KernelError::Directive)?;
        self.parser
            .clone()
            .try_get_matches_from(words)
            .map_err(|e| KernelError::Directive(e.render().to_string().trim_end().to_string()))
    }

    pub async fn invoke(
        &self,
        line: &str,
        context: &KernelInvocationContext,
        kernel_name: Option<String>,
    ) -> Result<(), KernelError> {
        let matches = self.parse(line)?;
        log::debug!("invoking directive {}", self.name);
        (self.handler)(DirectiveInvocation {
            name: self.name.clone(),
            matches,
            context: context.clone(),
            kernel_name,
        })
        .await
    }
}

/// Name to directive table; lookups are case-insensitive.
#[derive(Default)]
pub struct DirectiveRegistry {
    entries: RwLock<IndexMap<String, Arc<Directive>>>,
}

impl DirectiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, directive: Directive) -> Result<(), KernelError> {
        let key = directive.name().to_lowercase();
        let mut entries = self
            .entries
            .write()
            .map_err(|_| KernelError::Directive("directive table poisoned".into()))?;
        if entries.contains_key(&key) {
            return Err(KernelError::DuplicateDirective(directive.name().to_string()));
        }
        entries.insert(key, Arc::new(directive));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Directive>> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(&name.to_lowercase()).cloned())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|entries| entries.values().map(|d| d.name().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn describe(&self) -> Vec<(String, String)> {
        self.entries
            .read()
            .map(|entries| {
                entries
                    .values()
                    .map(|d| (d.name().to_string(), d.description().to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }
}
