mod helpers;
mod mocks;

mod auth;
mod orders;
mod settlement;
