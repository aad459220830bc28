mod algorithms;
