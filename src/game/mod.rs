pub mod chat;
pub mod constants;
pub mod game_loop;
pub mod pool;
pub mod spatial;
pub mod state;
pub mod systems;
