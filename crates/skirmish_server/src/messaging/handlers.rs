//! Message interpretation inside a session.
//!
//! A routed [`GameMessage`] reaches its session queue wrapped in an
//! [`InterpretCommand`]. When the session ticks, the command resolves
//! `MessageHandler.<operation_id>` through the session scope chain and executes the
//! command the handler returns. Handlers registered in the root scope serve every
//! session; a session or shard scope can override any of them.

use crate::behaviour::{fuel_checked_move, MoveCommand, ObjectAdapter, RotateCommand};
use crate::messaging::types::GameMessage;
use crate::objects::{GameObject, PropertyBag, GAME_OBJECTS};
use serde_json::{Map, Value};
use skirmish_runtime::{
    BoxedCommand, Command, CommandError, DeferredCommand, Dependency, ResolveError, Resolver,
    SCHEDULE_COMMAND,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Error kind raised when a message's arguments have the wrong shape.
pub const INVALID_ARGUMENTS: &str = "invalid_arguments";

/// What a message handler receives.
#[derive(Clone)]
pub struct MessageContext {
    pub resolver: Arc<Resolver>,
    pub message: GameMessage,
}

/// Identifier of the handler for one operation.
pub fn message_handler(operation_id: &str) -> Dependency<MessageContext, BoxedCommand> {
    Dependency::named(format!("MessageHandler.{operation_id}"))
}

/// Resolves and runs the handler for a message, in whatever scope is current.
pub struct InterpretCommand {
    resolver: Arc<Resolver>,
    message: GameMessage,
}

impl InterpretCommand {
    pub fn new(resolver: Arc<Resolver>, message: GameMessage) -> Self {
        Self { resolver, message }
    }
}

impl Command for InterpretCommand {
    fn execute(&mut self) -> Result<(), CommandError> {
        debug!(
            session = %self.message.session_id,
            entity = self.message.entity_id,
            operation = %self.message.operation_id,
            "📨 Interpreting message"
        );
        let context = MessageContext {
            resolver: self.resolver.clone(),
            message: self.message.clone(),
        };
        let mut command = self
            .resolver
            .resolve(&message_handler(&self.message.operation_id), context)?;
        command.execute()
    }
}

/// Registers the built-in handlers in the current scope.
///
/// | operation | effect |
/// |-----------|--------|
/// | `create_object` | creates the entity, `args` become its properties |
/// | `set_properties` | sets every entry of `args` on the entity |
/// | `move` | sets `args`, then schedules one move |
/// | `rotate` | sets `args`, then schedules one rotation |
/// | `burn_move` | sets `args`, then schedules a fuel-checked move |
pub fn register_default_handlers(resolver: &Resolver) -> Result<(), CommandError> {
    resolver.register(&message_handler("create_object"), |context| {
        deferred(context, create_object)
    })?;
    resolver.register(&message_handler("set_properties"), |context| {
        deferred(context, set_properties)
    })?;
    resolver.register(&message_handler("move"), |context| deferred(context, start_move))?;
    resolver.register(&message_handler("rotate"), |context| deferred(context, start_rotate))?;
    resolver.register(&message_handler("burn_move"), |context| {
        deferred(context, start_burn_move)
    })?;
    info!("📋 Registered default message handlers");
    Ok(())
}

type Apply = fn(&MessageContext) -> Result<(), CommandError>;

fn deferred(context: MessageContext, apply: Apply) -> Result<BoxedCommand, ResolveError> {
    Ok(Box::new(DeferredCommand::new(apply, context)))
}

fn arguments(context: &MessageContext) -> Result<Map<String, Value>, CommandError> {
    match &context.message.args {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Map::new()),
        other => Err(CommandError::domain(
            INVALID_ARGUMENTS,
            format!(
                "'{}' expects an object of properties, got {other}",
                context.message.operation_id
            ),
        )),
    }
}

fn target(context: &MessageContext) -> Result<Arc<dyn GameObject>, CommandError> {
    let objects = context.resolver.resolve(&GAME_OBJECTS, ())?;
    objects.get(context.message.entity_id)
}

fn schedule(context: &MessageContext, command: BoxedCommand) -> Result<(), CommandError> {
    Ok(context.resolver.resolve(&SCHEDULE_COMMAND, command)?)
}

fn create_object(context: &MessageContext) -> Result<(), CommandError> {
    let properties = arguments(context)?;
    let objects = context.resolver.resolve(&GAME_OBJECTS, ())?;
    objects.insert(
        context.message.entity_id,
        Arc::new(PropertyBag::from_map(properties)),
    );
    info!(
        session = %context.message.session_id,
        entity = context.message.entity_id,
        "🛸 Created entity"
    );
    Ok(())
}

fn set_properties(context: &MessageContext) -> Result<(), CommandError> {
    let entity = target(context)?;
    for (name, value) in arguments(context)? {
        entity.set_property(&name, value)?;
    }
    Ok(())
}

fn start_move(context: &MessageContext) -> Result<(), CommandError> {
    set_properties(context)?;
    let entity = ObjectAdapter(target(context)?);
    schedule(context, Box::new(MoveCommand(entity)))
}

fn start_rotate(context: &MessageContext) -> Result<(), CommandError> {
    set_properties(context)?;
    let entity = ObjectAdapter(target(context)?);
    schedule(context, Box::new(RotateCommand(entity)))
}

fn start_burn_move(context: &MessageContext) -> Result<(), CommandError> {
    set_properties(context)?;
    let entity = ObjectAdapter(target(context)?);
    schedule(context, Box::new(fuel_checked_move(entity)))
}
