pub mod test_join_room;
pub mod test_socket_lifecycle;
