//! Static command tables
//!
//! Every backend publishes one [`CommandRegistry`]: the commands it accepts,
//! their arity and help text, and the handler that performs the native call.
//! Lookup is case-insensitive and supports multi-word names (`CONFIG GET`);
//! when several names match the longest one wins.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use kvbridge_core::{Error, KeyEvent, NValue, Result};

/// Unbounded optional argument count.
pub const INFINITE_ARGS: usize = usize::MAX;

/// Performs one command against a native handle and returns its reply.
pub type CommandHandler<H> = fn(&mut CommandContext<'_, H>, &[String]) -> Result<NValue>;

/// One command descriptor.
pub struct CommandHolder<H> {
    /// Command name, words separated by a single space
    pub name: &'static str,
    /// Argument syntax, e.g. `<key> <value>`
    pub params: &'static str,
    /// One-line description
    pub summary: &'static str,
    /// Protocol version that introduced the command
    pub since: &'static str,
    /// Example invocation
    pub example: &'static str,
    /// Mandatory argument count
    pub required_args: usize,
    /// Optional argument count, [`INFINITE_ARGS`] for variadic commands
    pub optional_args: usize,
    /// Native implementation
    pub handler: CommandHandler<H>,
}

impl<H> CommandHolder<H> {
    /// Describe a command.
    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        name: &'static str,
        params: &'static str,
        summary: &'static str,
        since: &'static str,
        example: &'static str,
        required_args: usize,
        optional_args: usize,
        handler: CommandHandler<H>,
    ) -> Self {
        Self {
            name,
            params,
            summary,
            since,
            example,
            required_args,
            optional_args,
            handler,
        }
    }

    /// Smallest accepted argument count.
    pub fn min_args(&self) -> usize {
        self.required_args
    }

    /// Largest accepted argument count, `None` when unbounded.
    pub fn max_args(&self) -> Option<usize> {
        if self.optional_args == INFINITE_ARGS {
            None
        } else {
            Some(self.required_args + self.optional_args)
        }
    }

    /// Validate an argument count against the descriptor's bounds.
    pub fn check_arity(&self, passed: usize) -> Result<()> {
        let too_many = self.max_args().map(|max| passed > max).unwrap_or(false);
        if passed < self.min_args() || too_many {
            return Err(Error::WrongArity {
                command: self.name.to_string(),
                passed,
                min: self.min_args(),
                max: self.max_args(),
            });
        }
        Ok(())
    }

    fn words(&self) -> usize {
        self.name.split(' ').count()
    }

    fn matches(&self, tokens: &[String]) -> bool {
        let words: Vec<&str> = self.name.split(' ').collect();
        tokens.len() >= words.len()
            && words
                .iter()
                .zip(tokens)
                .all(|(word, token)| word.eq_ignore_ascii_case(token))
    }

    /// Multi-line help text.
    pub fn help(&self) -> String {
        let mut text = format!("{} {}\n  {}", self.name, self.params, self.summary);
        if !self.since.is_empty() {
            text.push_str(&format!("\n  since: {}", self.since));
        }
        if !self.example.is_empty() {
            text.push_str(&format!("\n  example: {}", self.example));
        }
        text
    }
}

impl<H> std::fmt::Debug for CommandHolder<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHolder")
            .field("name", &self.name)
            .field("required_args", &self.required_args)
            .field("optional_args", &self.optional_args)
            .finish()
    }
}

/// Command table of one backend.
pub struct CommandRegistry<H> {
    commands: Vec<CommandHolder<H>>,
    // first word, uppercased -> indexes into `commands`
    by_first_word: HashMap<String, Vec<usize>>,
}

impl<H> CommandRegistry<H> {
    /// Build a registry.
    pub fn new(commands: Vec<CommandHolder<H>>) -> Self {
        let mut by_first_word: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, holder) in commands.iter().enumerate() {
            let first = holder.name.split(' ').next().unwrap_or_default();
            by_first_word
                .entry(first.to_ascii_uppercase())
                .or_default()
                .push(i);
        }
        Self {
            commands,
            by_first_word,
        }
    }

    /// Find the descriptor for `tokens`; returns it with the number of
    /// tokens its name consumed.
    pub fn find(&self, tokens: &[String]) -> Option<(&CommandHolder<H>, usize)> {
        let first = tokens.first()?.to_ascii_uppercase();
        self.by_first_word
            .get(&first)?
            .iter()
            .map(|i| &self.commands[*i])
            .filter(|holder| holder.matches(tokens))
            .max_by_key(|holder| holder.words())
            .map(|holder| (holder, holder.words()))
    }

    /// Descriptor by exact (case-insensitive) name.
    pub fn get(&self, name: &str) -> Option<&CommandHolder<H>> {
        self.commands
            .iter()
            .find(|holder| holder.name.eq_ignore_ascii_case(name))
    }

    /// Every descriptor in table order.
    pub fn commands(&self) -> &[CommandHolder<H>] {
        &self.commands
    }

    /// Number of descriptors.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// `HELP` reply: the command list, or one command's help.
    pub fn help(&self, args: &[String]) -> Result<NValue> {
        if args.is_empty() {
            let names = self
                .commands
                .iter()
                .map(|holder| NValue::String(holder.name.to_string()))
                .collect();
            return Ok(NValue::Array(names));
        }
        let tokens: Vec<String> = args
            .iter()
            .flat_map(|a| a.split(' ').map(str::to_string).collect::<Vec<_>>())
            .collect();
        match self.find(&tokens) {
            Some((holder, _)) => Ok(NValue::String(holder.help())),
            None => Err(Error::unknown_command(args.join(" "))),
        }
    }
}

/// What a handler may touch while it runs.
pub struct CommandContext<'a, H> {
    /// The open native handle
    pub handle: &'a mut H,
    registry: &'a CommandRegistry<H>,
    events: &'a mut Vec<KeyEvent>,
    interrupt: &'a AtomicBool,
    default_count: u64,
}

impl<'a, H> CommandContext<'a, H> {
    /// Assemble a context for one handler call.
    pub fn new(
        handle: &'a mut H,
        registry: &'a CommandRegistry<H>,
        events: &'a mut Vec<KeyEvent>,
        interrupt: &'a AtomicBool,
        default_count: u64,
    ) -> Self {
        Self {
            handle,
            registry,
            events,
            interrupt,
            default_count,
        }
    }

    /// Queue a key-change notification.
    pub fn notify(&mut self, event: KeyEvent) {
        self.events.push(event);
    }

    /// The registry the command was found in.
    pub fn registry(&self) -> &CommandRegistry<H> {
        self.registry
    }

    /// The interrupt flag, for loops that check it between items.
    pub fn interrupt_flag(&self) -> &AtomicBool {
        self.interrupt
    }

    /// Fail with `Interrupted` if cancellation was requested.
    pub fn checkpoint(&self) -> Result<()> {
        if self.interrupt.load(Ordering::Acquire) {
            return Err(Error::Interrupted);
        }
        Ok(())
    }

    /// Page size used when `SCAN` has no `COUNT`.
    pub fn default_count(&self) -> u64 {
        self.default_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(_: &mut CommandContext<'_, ()>, args: &[String]) -> Result<NValue> {
        Ok(NValue::Integer(args.len() as i64))
    }

    fn table() -> CommandRegistry<()> {
        CommandRegistry::new(vec![
            CommandHolder::new("GET", "<key>", "Get a key", "1.0.0", "GET k", 1, 0, ok),
            CommandHolder::new("DEL", "<key> [key ...]", "Delete keys", "1.0.0", "", 1, INFINITE_ARGS, ok),
            CommandHolder::new("CONFIG", "<sub>", "Config", "", "", 1, INFINITE_ARGS, ok),
            CommandHolder::new("CONFIG GET", "<parameter>", "Read config", "", "", 1, 0, ok),
        ])
    }

    fn tokens(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = table();
        let (holder, used) = registry.find(&tokens("get k")).unwrap();
        assert_eq!(holder.name, "GET");
        assert_eq!(used, 1);
    }

    #[test]
    fn test_longest_multi_word_name_wins() {
        let registry = table();
        let (holder, used) = registry.find(&tokens("config get maxmemory")).unwrap();
        assert_eq!(holder.name, "CONFIG GET");
        assert_eq!(used, 2);

        let (holder, _) = registry.find(&tokens("CONFIG SET a b")).unwrap();
        assert_eq!(holder.name, "CONFIG");
    }

    #[test]
    fn test_unknown_command() {
        assert!(table().find(&tokens("PUT k v")).is_none());
        assert!(table().find(&[]).is_none());
    }

    #[test]
    fn test_arity_bounds() {
        let registry = table();
        let get = registry.get("get").unwrap();
        assert!(get.check_arity(1).is_ok());
        assert!(matches!(get.check_arity(0), Err(Error::WrongArity { passed: 0, min: 1, max: Some(1), .. })));
        assert!(get.check_arity(2).is_err());

        let del = registry.get("DEL").unwrap();
        assert_eq!(del.max_args(), None);
        assert!(del.check_arity(100).is_ok());
        assert!(del.check_arity(0).is_err());
    }

    #[test]
    fn test_help_lists_and_describes() {
        let registry = table();
        let list = registry.help(&[]).unwrap();
        assert_eq!(list.as_array().unwrap().len(), 4);

        let one = registry.help(&["config get".to_string()]).unwrap();
        assert!(one.as_str().unwrap().starts_with("CONFIG GET <parameter>"));

        assert!(registry.help(&["nope".to_string()]).is_err());
    }

    #[test]
    fn test_context_checkpoint() {
        let registry = table();
        let mut handle = ();
        let mut events = Vec::new();
        let flag = AtomicBool::new(false);
        let mut ctx = CommandContext::new(&mut handle, &registry, &mut events, &flag, 10);
        assert!(ctx.checkpoint().is_ok());
        ctx.notify(KeyEvent::Flushed);
        flag.store(true, Ordering::Release);
        assert_eq!(ctx.checkpoint().unwrap_err(), Error::Interrupted);
        drop(ctx);
        assert_eq!(events, vec![KeyEvent::Flushed]);
    }
}
