// Input injection abstraction for cosmic-rdp-server.
//
// Provides the InputSink trait and implementations:
// - libei.rs: enigo/libei backend for COSMIC compositor
// - keymap.rs: RDP scancode to XKB keycode mapping
// - event_queue.rs: mutex-protected FIFO handing events from the transport
//   task to the session thread that owns the libei connection

pub mod event_queue;
pub mod keymap;
pub mod libei;
