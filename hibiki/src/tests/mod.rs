mod derive_macro;
/// Two clients sharing one in-process broker, going through the whole API.
mod tour;
